//! Approval ledger: append-only record of who signed which transaction.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Approval, Transaction};
use crate::error::PaymentError;
use crate::ports::{PaymentRepository, RepositoryError};

#[derive(Clone)]
pub struct ApprovalLedger {
    repository: Arc<dyn PaymentRepository>,
}

impl ApprovalLedger {
    pub fn new(repository: Arc<dyn PaymentRepository>) -> Self {
        Self { repository }
    }

    /// Approvals ordered by signature level ascending.
    pub async fn list_approvals(&self, transaction_id: Uuid) -> Result<Vec<Approval>, PaymentError> {
        self.repository
            .approvals(transaction_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => PaymentError::TransactionNotFound(transaction_id),
                other => PaymentError::Repository(other),
            })
    }

    /// Appends the approval at `signature_level` together with `advanced`, the
    /// transaction as the state machine left it after counting this signature.
    ///
    /// The level must be the one the counter just moved to; the repository
    /// refuses a second approval from the same approver.
    pub async fn add_approval(
        &self,
        advanced: &Transaction,
        approver_id: &str,
        key_share: &str,
        signature_level: u32,
    ) -> Result<Approval, PaymentError> {
        if signature_level == 0 || signature_level != advanced.collected_signatures {
            return Err(PaymentError::InvalidTransition {
                transaction_id: advanced.id,
                from: advanced.status,
                event: "append approval out of order",
            });
        }

        let signed_at = Utc::now();
        let approval = Approval {
            transaction_id: advanced.id,
            approver_id: approver_id.to_string(),
            signature_level,
            signature: signature_artifact(advanced.id, approver_id, key_share, signature_level, signed_at),
            signed_at,
        };

        match self.repository.record_approval(&approval, advanced).await {
            Ok(()) => {
                tracing::info!(
                    transaction_id = %advanced.id,
                    approver_id,
                    signature_level,
                    "Approval recorded"
                );
                Ok(approval)
            }
            Err(RepositoryError::Duplicate(_)) => Err(PaymentError::AlreadySigned {
                transaction_id: advanced.id,
                approver_id: approver_id.to_string(),
            }),
            Err(RepositoryError::NotFound(_)) => Err(PaymentError::TransactionNotFound(advanced.id)),
            Err(e) => Err(PaymentError::Repository(e)),
        }
    }
}

/// Opaque artifact binding transaction, approver, level and time to the
/// approver's key-share credential. A threshold backend would return a partial
/// signature here instead.
fn signature_artifact(
    transaction_id: Uuid,
    approver_id: &str,
    key_share: &str,
    signature_level: u32,
    signed_at: chrono::DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_share.as_bytes());
    hasher.update(transaction_id.as_bytes());
    hasher.update(approver_id.as_bytes());
    hasher.update(signature_level.to_be_bytes());
    hasher.update(signed_at.timestamp_millis().to_be_bytes());
    format!("sig_{}_{}", signature_level, hex::encode(hasher.finalize()))
}
