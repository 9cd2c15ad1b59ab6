//! Transaction state machine.
//!
//! `pending_signature_1 → … → pending_signature_N → broadcasting → complete`,
//! with `failed` reachable from any pending state (a single rejection vetoes)
//! and from `broadcasting` when settlement fails. The functions here mutate a
//! `Transaction` value in place and perform no I/O; the orchestrator decides
//! when the result is persisted.

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use uuid::Uuid;

use super::approval::{has_signed, Approval};
use super::transaction::{
    Currency, PaymentReferences, Recipient, Transaction, TransactionKind, TransactionStatus,
};
use crate::error::PaymentError;

/// Everything needed to open a transaction, fees already computed.
#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub account_id: String,
    pub kind: TransactionKind,
    pub currency: Currency,
    pub amount: BigDecimal,
    pub recipient: Recipient,
    pub references: PaymentReferences,
    pub service_fee: BigDecimal,
    pub network_fee: BigDecimal,
    pub initiated_by: String,
    pub custody_transaction_id: Option<String>,
}

/// Result of a broadcast once the settlement network answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Confirmed,
    Failed,
}

/// Opens a transaction awaiting its first signature.
///
/// A quorum of zero (receive-type entries) is born `complete`. Outbound
/// transactions must be covered by `available` including fees.
pub fn initiate(
    draft: PaymentDraft,
    required_signatures: u32,
    available: &BigDecimal,
) -> Result<Transaction, PaymentError> {
    if draft.amount <= BigDecimal::zero() {
        return Err(PaymentError::InvalidAmount(format!(
            "amount must be greater than 0, got {}",
            draft.amount
        )));
    }

    let now = Utc::now();
    let status = if required_signatures == 0 {
        TransactionStatus::Complete
    } else {
        TransactionStatus::PendingSignature(1)
    };

    let tx = Transaction {
        id: Uuid::new_v4(),
        account_id: draft.account_id,
        kind: draft.kind,
        currency: draft.currency,
        amount: draft.amount,
        status,
        required_signatures,
        collected_signatures: 0,
        recipient: draft.recipient,
        references: draft.references,
        service_fee: draft.service_fee,
        network_fee: draft.network_fee,
        initiated_by: draft.initiated_by,
        custody_transaction_id: draft.custody_transaction_id,
        blockchain_reference: None,
        created_at: now,
        updated_at: now,
    };

    if tx.kind == TransactionKind::Send {
        let requested = tx.total_debit();
        if *available < requested {
            return Err(PaymentError::InsufficientBalance {
                requested,
                available: available.clone(),
            });
        }
    }

    Ok(tx)
}

/// Counts one more signature from `approver_id`.
///
/// Reaching the quorum moves the transaction to `broadcasting`; otherwise it
/// waits for the next level.
pub fn record_signature(
    tx: &mut Transaction,
    approver_id: &str,
    approvals: &[Approval],
) -> Result<(), PaymentError> {
    ensure_signable(tx)?;
    if has_signed(approvals, approver_id) {
        return Err(PaymentError::DuplicateSignature {
            transaction_id: tx.id,
            approver_id: approver_id.to_string(),
        });
    }

    tx.collected_signatures += 1;
    tx.status = if tx.collected_signatures >= tx.required_signatures {
        TransactionStatus::Broadcasting
    } else {
        TransactionStatus::PendingSignature(tx.collected_signatures + 1)
    };
    tx.touch();
    Ok(())
}

/// A single rejection fails the transaction regardless of collected signatures.
pub fn reject(
    tx: &mut Transaction,
    approver_id: &str,
    approvals: &[Approval],
) -> Result<(), PaymentError> {
    ensure_signable(tx)?;
    if has_signed(approvals, approver_id) {
        return Err(PaymentError::DuplicateSignature {
            transaction_id: tx.id,
            approver_id: approver_id.to_string(),
        });
    }

    tx.status = TransactionStatus::Failed;
    tx.touch();
    Ok(())
}

/// Settles a broadcasting transaction.
pub fn finalize(tx: &mut Transaction, outcome: SettlementOutcome) -> Result<(), PaymentError> {
    if tx.status != TransactionStatus::Broadcasting {
        return Err(PaymentError::InvalidTransition {
            transaction_id: tx.id,
            from: tx.status,
            event: "finalize",
        });
    }

    tx.status = match outcome {
        SettlementOutcome::Confirmed => TransactionStatus::Complete,
        SettlementOutcome::Failed => TransactionStatus::Failed,
    };
    tx.touch();
    Ok(())
}

/// Status and counters agree with each other.
pub fn is_consistent(tx: &Transaction) -> bool {
    if tx.collected_signatures > tx.required_signatures {
        return false;
    }
    match tx.status {
        TransactionStatus::PendingSignature(level) => {
            level == tx.collected_signatures + 1 && tx.collected_signatures < tx.required_signatures
        }
        TransactionStatus::Broadcasting | TransactionStatus::Complete => {
            tx.collected_signatures == tx.required_signatures
        }
        TransactionStatus::Failed => true,
    }
}

fn ensure_signable(tx: &Transaction) -> Result<(), PaymentError> {
    if tx.required_signatures == 0 || !tx.status.is_pending() {
        return Err(PaymentError::NotSignable {
            transaction_id: tx.id,
            status: tx.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn draft(amount: &str) -> PaymentDraft {
        PaymentDraft {
            account_id: "acct_1".to_string(),
            kind: TransactionKind::Send,
            currency: Currency::Brl,
            amount: BigDecimal::from_str(amount).unwrap(),
            recipient: Recipient {
                name: "Porto Logistica".to_string(),
                account: "12345678000190".to_string(),
            },
            references: PaymentReferences::default(),
            service_fee: BigDecimal::from(10),
            network_fee: BigDecimal::zero(),
            initiated_by: "alice".to_string(),
            custody_transaction_id: None,
        }
    }

    fn approval(tx: &Transaction, approver: &str, level: u32) -> Approval {
        Approval {
            transaction_id: tx.id,
            approver_id: approver.to_string(),
            signature_level: level,
            signature: format!("sig_{}", level),
            signed_at: Utc::now(),
        }
    }

    #[test]
    fn test_initiate_starts_at_first_signature() {
        let tx = initiate(draft("1000"), 2, &BigDecimal::from(5000)).unwrap();
        assert_eq!(tx.status, TransactionStatus::PendingSignature(1));
        assert_eq!(tx.collected_signatures, 0);
        assert!(is_consistent(&tx));
    }

    #[test]
    fn test_initiate_rejects_non_positive_amount() {
        let err = initiate(draft("0"), 2, &BigDecimal::from(5000)).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidAmount(_)));

        let err = initiate(draft("-5"), 2, &BigDecimal::from(5000)).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidAmount(_)));
    }

    #[test]
    fn test_initiate_counts_fees_against_balance() {
        // 1000 + 10 service fee does not fit in 1005
        let err = initiate(draft("1000"), 2, &BigDecimal::from(1005)).unwrap_err();
        match err {
            PaymentError::InsufficientBalance { requested, available } => {
                assert_eq!(requested, BigDecimal::from(1010));
                assert_eq!(available, BigDecimal::from(1005));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_quorum_is_born_complete_and_not_signable() {
        let mut receive = draft("250");
        receive.kind = TransactionKind::Receive;
        let mut tx = initiate(receive, 0, &BigDecimal::zero()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Complete);

        let err = record_signature(&mut tx, "bob", &[]).unwrap_err();
        assert!(matches!(err, PaymentError::NotSignable { .. }));
        let err = reject(&mut tx, "bob", &[]).unwrap_err();
        assert!(matches!(err, PaymentError::NotSignable { .. }));
    }

    #[test]
    fn test_signatures_walk_levels_until_broadcasting() {
        let mut tx = initiate(draft("1000"), 3, &BigDecimal::from(5000)).unwrap();
        let mut approvals = Vec::new();

        record_signature(&mut tx, "alice", &approvals).unwrap();
        approvals.push(approval(&tx, "alice", 1));
        assert_eq!(tx.status, TransactionStatus::PendingSignature(2));

        record_signature(&mut tx, "bob", &approvals).unwrap();
        approvals.push(approval(&tx, "bob", 2));
        assert_eq!(tx.status, TransactionStatus::PendingSignature(3));

        record_signature(&mut tx, "carol", &approvals).unwrap();
        assert_eq!(tx.status, TransactionStatus::Broadcasting);
        assert_eq!(tx.collected_signatures, 3);
        assert!(is_consistent(&tx));

        let err = record_signature(&mut tx, "dave", &approvals).unwrap_err();
        assert!(matches!(err, PaymentError::NotSignable { .. }));
    }

    #[test]
    fn test_duplicate_signature_is_refused() {
        let mut tx = initiate(draft("1000"), 2, &BigDecimal::from(5000)).unwrap();
        record_signature(&mut tx, "alice", &[]).unwrap();
        let approvals = vec![approval(&tx, "alice", 1)];

        let err = record_signature(&mut tx, "alice", &approvals).unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateSignature { .. }));
        assert_eq!(tx.collected_signatures, 1);
    }

    #[test]
    fn test_single_rejection_vetoes() {
        let mut tx = initiate(draft("1000"), 3, &BigDecimal::from(5000)).unwrap();
        record_signature(&mut tx, "alice", &[]).unwrap();
        let approvals = vec![approval(&tx, "alice", 1)];

        let err = reject(&mut tx, "alice", &approvals).unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateSignature { .. }));

        reject(&mut tx, "bob", &approvals).unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);

        let err = record_signature(&mut tx, "carol", &approvals).unwrap_err();
        assert!(matches!(err, PaymentError::NotSignable { .. }));
    }

    #[test]
    fn test_finalize_only_from_broadcasting() {
        let mut tx = initiate(draft("1000"), 1, &BigDecimal::from(5000)).unwrap();
        let err = finalize(&mut tx, SettlementOutcome::Confirmed).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));

        record_signature(&mut tx, "alice", &[]).unwrap();
        finalize(&mut tx, SettlementOutcome::Confirmed).unwrap();
        assert_eq!(tx.status, TransactionStatus::Complete);

        let err = finalize(&mut tx, SettlementOutcome::Failed).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failed_settlement() {
        let mut tx = initiate(draft("1000"), 1, &BigDecimal::from(5000)).unwrap();
        record_signature(&mut tx, "alice", &[]).unwrap();
        finalize(&mut tx, SettlementOutcome::Failed).unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert!(is_consistent(&tx));
    }
}
