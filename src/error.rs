use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::custody::CustodyError;
use crate::domain::TransactionStatus;
use crate::ports::RepositoryError;
use crate::validation::ValidationError;

/// Domain errors surfaced verbatim to the orchestrator's callers.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: BigDecimal,
        available: BigDecimal,
    },

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Approver {approver_id} has already signed transaction {transaction_id}")]
    AlreadySigned {
        transaction_id: Uuid,
        approver_id: String,
    },

    #[error("Duplicate signature from {approver_id} on transaction {transaction_id}")]
    DuplicateSignature {
        transaction_id: Uuid,
        approver_id: String,
    },

    #[error("Transaction {transaction_id} cannot be signed in status {status}")]
    NotSignable {
        transaction_id: Uuid,
        status: TransactionStatus,
    },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Transaction {transaction_id} cannot {event} from status {from}")]
    InvalidTransition {
        transaction_id: Uuid,
        from: TransactionStatus,
        event: &'static str,
    },

    #[error("Account {0} has no custody vault")]
    VaultNotFound(String),

    #[error("Quorum of {required} is below the custody vault threshold of {threshold}")]
    QuorumBelowThreshold { required: u32, threshold: u32 },

    #[error("Custody transaction of {transaction_id} holds signatures missing from the ledger: {signers:?}")]
    CustodySignersDiverged {
        transaction_id: Uuid,
        signers: Vec<String>,
    },

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl PaymentError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidAmount(_) => "INVALID_AMOUNT",
            PaymentError::Validation(_) => "VALIDATION_ERROR",
            PaymentError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            PaymentError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            PaymentError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            PaymentError::AlreadySigned { .. } => "ALREADY_SIGNED",
            PaymentError::DuplicateSignature { .. } => "DUPLICATE_SIGNATURE",
            PaymentError::NotSignable { .. } => "NOT_SIGNABLE",
            PaymentError::NotAuthorized(_) => "NOT_AUTHORIZED",
            PaymentError::InvalidTransition { .. } => "INVALID_TRANSITION",
            PaymentError::VaultNotFound(_) => "VAULT_NOT_FOUND",
            PaymentError::QuorumBelowThreshold { .. } => "QUORUM_BELOW_THRESHOLD",
            PaymentError::CustodySignersDiverged { .. } => "CUSTODY_SIGNERS_DIVERGED",
            PaymentError::Custody(CustodyError::VaultNotFound(_)) => "VAULT_NOT_FOUND",
            PaymentError::Custody(e) if e.is_transient() => "CUSTODY_UNAVAILABLE",
            PaymentError::Custody(_) => "CUSTODY_REJECTED",
            PaymentError::Repository(_) => "STORAGE_ERROR",
        }
    }

    /// The caller may repeat the same request; no state was changed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Custody(e) => e.is_transient(),
            _ => false,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::InvalidAmount(_)
            | PaymentError::Validation(_)
            | PaymentError::InsufficientBalance { .. }
            | PaymentError::QuorumBelowThreshold { .. } => StatusCode::BAD_REQUEST,
            PaymentError::AccountNotFound(_)
            | PaymentError::TransactionNotFound(_)
            | PaymentError::VaultNotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            PaymentError::AlreadySigned { .. }
            | PaymentError::DuplicateSignature { .. }
            | PaymentError::NotSignable { .. }
            | PaymentError::InvalidTransition { .. }
            | PaymentError::CustodySignersDiverged { .. } => StatusCode::CONFLICT,
            PaymentError::Custody(CustodyError::VaultNotFound(_)) => StatusCode::NOT_FOUND,
            PaymentError::Custody(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::Custody(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Payment(e) => e.status_code(),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Payment(e) => e.code(),
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, AppError::Payment(e) if e.is_retryable())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::from(PaymentError::InvalidAmount("must be positive".to_string()));
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.code(), "INVALID_AMOUNT");
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::from(PaymentError::TransactionNotFound(Uuid::nil()));
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_signature_conflicts() {
        let error = AppError::from(PaymentError::AlreadySigned {
            transaction_id: Uuid::nil(),
            approver_id: "bob".to_string(),
        });
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.code(), "ALREADY_SIGNED");

        let error = AppError::from(PaymentError::NotSignable {
            transaction_id: Uuid::nil(),
            status: TransactionStatus::Failed,
        });
        assert_eq!(error.status_code(), StatusCode::CONFLICT);

        let error = AppError::from(PaymentError::CustodySignersDiverged {
            transaction_id: Uuid::nil(),
            signers: vec!["bob".to_string()],
        });
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.code(), "CUSTODY_SIGNERS_DIVERGED");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_not_authorized_status_code() {
        let error = AppError::from(PaymentError::NotAuthorized("viewer".to_string()));
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_custody_timeout_is_retryable() {
        let error = AppError::from(PaymentError::Custody(CustodyError::Timeout {
            operation: "sign",
            after: Duration::from_secs(2),
        }));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.code(), "CUSTODY_UNAVAILABLE");
        assert!(error.is_retryable());
    }

    #[test]
    fn test_custody_rejection_is_not_retryable() {
        let error = AppError::from(PaymentError::Custody(CustodyError::NotReadyToBroadcast {
            id: "ctx_000001".to_string(),
            status: crate::custody::CustodyStatus::PendingSignature,
        }));
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_insufficient_balance_response() {
        let error = AppError::from(PaymentError::InsufficientBalance {
            requested: BigDecimal::from(100),
            available: BigDecimal::from(10),
        });
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let error = AppError::Unauthorized("missing x-user-id header".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
