use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One approver's co-signature on a transaction. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub transaction_id: Uuid,
    pub approver_id: String,
    /// 1-based position of this signature within the quorum.
    pub signature_level: u32,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

/// Whether `approver_id` already appears among `approvals`.
pub fn has_signed(approvals: &[Approval], approver_id: &str) -> bool {
    approvals.iter().any(|a| a.approver_id == approver_id)
}
