//! Transaction domain entity.
//! Framework-agnostic representation of a quorum-gated payment.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::custody::Asset;

/// Closed set of currencies a payment account can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Brazilian real, settled instantly over the PIX rail.
    Brl,
    /// US dollar, settled on chain through the custody vault.
    Usd,
}

/// How a currency reaches its recipient once quorum is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Instant,
    Chain(Asset),
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Brl, Currency::Usd];

    pub fn settlement(&self) -> Settlement {
        match self {
            Currency::Brl => Settlement::Instant,
            Currency::Usd => Settlement::Chain(Asset::Usdc),
        }
    }

    pub fn is_chain_settled(&self) -> bool {
        matches!(self.settlement(), Settlement::Chain(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Brl => "BRL",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BRL" => Ok(Currency::Brl),
            "USD" => Ok(Currency::Usd),
            other => Err(format!("unsupported currency '{}'", other)),
        }
    }
}

/// Status vocabulary exposed to collaborators:
/// `pending_signature_<k>`, `broadcasting`, `complete`, `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TransactionStatus {
    /// Waiting for the signature at level `k` (1-based).
    PendingSignature(u32),
    Broadcasting,
    Complete,
    Failed,
}

impl TransactionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionStatus::PendingSignature(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Complete | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::PendingSignature(level) => write!(f, "pending_signature_{}", level),
            TransactionStatus::Broadcasting => f.write_str("broadcasting"),
            TransactionStatus::Complete => f.write_str("complete"),
            TransactionStatus::Failed => f.write_str("failed"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcasting" => Ok(TransactionStatus::Broadcasting),
            "complete" => Ok(TransactionStatus::Complete),
            "failed" => Ok(TransactionStatus::Failed),
            other => other
                .strip_prefix("pending_signature_")
                .and_then(|level| level.parse::<u32>().ok())
                .filter(|level| *level >= 1)
                .map(TransactionStatus::PendingSignature)
                .ok_or_else(|| format!("unknown transaction status '{}'", other)),
        }
    }
}

impl From<TransactionStatus> for String {
    fn from(status: TransactionStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Send,
    Receive,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Send => "send",
            TransactionKind::Receive => "receive",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send" => Ok(TransactionKind::Send),
            "receive" => Ok(TransactionKind::Receive),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Counterparty of a payment: display name plus PIX key or chain address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub account: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReferences {
    pub invoice_number: Option<String>,
    pub shipment_number: Option<String>,
    pub description: Option<String>,
}

/// Domain entity representing a payment under signature collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: String,
    pub kind: TransactionKind,
    pub currency: Currency,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub required_signatures: u32,
    pub collected_signatures: u32,
    pub recipient: Recipient,
    pub references: PaymentReferences,
    pub service_fee: BigDecimal,
    pub network_fee: BigDecimal,
    pub initiated_by: String,
    pub custody_transaction_id: Option<String>,
    pub blockchain_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount plus every fee charged against the funding account.
    pub fn total_debit(&self) -> BigDecimal {
        &self.amount + &self.service_fee + &self.network_fee
    }

    pub fn remaining_signatures(&self) -> u32 {
        self.required_signatures.saturating_sub(self.collected_signatures)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            TransactionStatus::PendingSignature(2).to_string(),
            "pending_signature_2"
        );
        assert_eq!(
            "pending_signature_3".parse::<TransactionStatus>(),
            Ok(TransactionStatus::PendingSignature(3))
        );
        assert_eq!(
            "broadcasting".parse::<TransactionStatus>(),
            Ok(TransactionStatus::Broadcasting)
        );
    }

    #[test]
    fn test_status_rejects_unknown_values() {
        assert!("pending_signature_0".parse::<TransactionStatus>().is_err());
        assert!("rejected".parse::<TransactionStatus>().is_err());
        assert!("pending_signature_x".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_as_string() {
        let json = serde_json::to_string(&TransactionStatus::PendingSignature(1)).unwrap();
        assert_eq!(json, "\"pending_signature_1\"");
    }

    #[test]
    fn test_currency_settlement() {
        assert_eq!(Currency::Brl.settlement(), Settlement::Instant);
        assert_eq!(Currency::Usd.settlement(), Settlement::Chain(Asset::Usdc));
        assert_eq!("usd".parse::<Currency>(), Ok(Currency::Usd));
        assert!("EUR".parse::<Currency>().is_err());
    }
}
