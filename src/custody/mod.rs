//! Custody layer: the vault that holds key shares and moves chain-settled funds.
//!
//! `SimulatedCustody` stands in for a threshold-signature backend.
//! `CustodyClient` wraps any `CustodyService` with a bounded timeout and a
//! circuit breaker, and is what the orchestrator talks to.

pub mod client;
pub mod simulator;
pub mod store;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use client::CustodyClient;
pub use simulator::{SimulatedCustody, SimulatorConfig};
pub use store::EntityStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("Vault {0} not found")]
    VaultNotFound(String),

    #[error("Custody transaction {0} not found")]
    CustodyTransactionNotFound(String),

    #[error("Custody transaction {id} is not pending signature (status {status})")]
    NotPendingSignature { id: String, status: CustodyStatus },

    #[error("Approver {approver_id} has already signed custody transaction {id}")]
    DuplicateSignature { id: String, approver_id: String },

    #[error("Custody transaction {id} is not ready to broadcast (status {status})")]
    NotReadyToBroadcast { id: String, status: CustodyStatus },

    #[error("Custody transaction {id} cannot be cancelled in status {status}")]
    NotCancellable { id: String, status: CustodyStatus },

    #[error("Custody call '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Custody circuit breaker is open")]
    CircuitOpen,

    #[error("Custody service unavailable: {0}")]
    Unavailable(String),
}

impl CustodyError {
    /// Faults of the custody backend itself, as opposed to rejected requests.
    /// Only these count toward the circuit breaker and are safe to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CustodyError::Timeout { .. } | CustodyError::CircuitOpen | CustodyError::Unavailable(_)
        )
    }
}

/// Stablecoins the vault can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Usdc,
    Usdt,
}

impl Asset {
    /// Base network fee in cents before jitter.
    pub fn base_fee_cents(&self) -> i64 {
        match self {
            Asset::Usdc => 250,
            Asset::Usdt => 300,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Usdc => "USDC",
            Asset::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultStatus {
    Active,
    Inactive,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: String,
    pub owner_id: String,
    pub address: String,
    pub threshold: u32,
    pub total_signers: u32,
    pub status: VaultStatus,
    pub balances: BTreeMap<Asset, BigDecimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyStatus {
    PendingSignature,
    ReadyToBroadcast,
    Submitted,
    Completed,
    Failed,
}

impl CustodyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CustodyStatus::Completed | CustodyStatus::Failed)
    }
}

impl fmt::Display for CustodyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CustodyStatus::PendingSignature => "PENDING_SIGNATURE",
            CustodyStatus::ReadyToBroadcast => "READY_TO_BROADCAST",
            CustodyStatus::Submitted => "SUBMITTED",
            CustodyStatus::Completed => "COMPLETED",
            CustodyStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub approver_id: String,
    pub signed_at: DateTime<Utc>,
    pub key_share_proof: String,
}

/// The custody backend's own view of a chain-settled payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyTransaction {
    pub id: String,
    pub vault_id: String,
    pub status: CustodyStatus,
    pub required_signatures: u32,
    pub collected_signatures: u32,
    pub signatures: Vec<SignatureRecord>,
    pub amount: BigDecimal,
    pub destination: String,
    pub asset: Asset,
    pub network_fee: BigDecimal,
    pub blockchain_reference: Option<String>,
    pub estimated_time: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CustodyTransaction {
    pub fn has_signature(&self, approver_id: &str) -> bool {
        self.signatures.iter().any(|s| s.approver_id == approver_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewCustodyTransaction {
    pub vault_id: String,
    pub amount: BigDecimal,
    pub destination: String,
    pub asset: Asset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureResult {
    pub custody_transaction_id: String,
    pub signature_added: bool,
    pub collected_signatures: u32,
    pub status: CustodyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub custody_transaction_id: String,
    pub blockchain_reference: String,
    pub status: CustodyStatus,
    pub estimated_time: String,
}

pub type VaultBalances = BTreeMap<Asset, BigDecimal>;

#[async_trait]
pub trait CustodyService: Send + Sync {
    async fn create_vault(&self, owner_id: &str) -> Result<Vault, CustodyError>;

    async fn get_vault(&self, vault_id: &str) -> Result<Vault, CustodyError>;

    async fn vault_balance(&self, vault_id: &str) -> Result<VaultBalances, CustodyError>;

    async fn deposit(
        &self,
        vault_id: &str,
        asset: Asset,
        amount: BigDecimal,
    ) -> Result<VaultBalances, CustodyError>;

    async fn create_transaction(
        &self,
        request: NewCustodyTransaction,
    ) -> Result<CustodyTransaction, CustodyError>;

    async fn get_transaction(&self, id: &str) -> Result<CustodyTransaction, CustodyError>;

    async fn sign(
        &self,
        id: &str,
        approver_id: &str,
        key_share_proof: &str,
    ) -> Result<SignatureResult, CustodyError>;

    async fn broadcast(&self, id: &str) -> Result<BroadcastResult, CustodyError>;

    async fn cancel(&self, id: &str) -> Result<CustodyTransaction, CustodyError>;

    /// Resolves once the transaction reaches `COMPLETED` or `FAILED`.
    async fn wait_for_settlement(&self, id: &str) -> Result<CustodyStatus, CustodyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(CustodyError::CircuitOpen.is_transient());
        assert!(CustodyError::Timeout {
            operation: "sign",
            after: Duration::from_millis(10)
        }
        .is_transient());
        assert!(!CustodyError::VaultNotFound("vault_000001".to_string()).is_transient());
        assert!(!CustodyError::DuplicateSignature {
            id: "ctx_000001".to_string(),
            approver_id: "bob".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_custody_status_wire_format() {
        let json = serde_json::to_string(&CustodyStatus::ReadyToBroadcast).unwrap();
        assert_eq!(json, "\"READY_TO_BROADCAST\"");
        assert_eq!(CustodyStatus::ReadyToBroadcast.to_string(), "READY_TO_BROADCAST");
    }
}
