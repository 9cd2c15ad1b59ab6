//! Ports at the engine's seams.
//! Persistence of payments plus the account and identity collaborators that
//! request handlers run alongside.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Approval, Currency, Transaction};
use crate::error::PaymentError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Storage for transactions and their approval ledger.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn get(&self, id: Uuid) -> RepositoryResult<Transaction>;

    /// Overwrites the mutable fields of an existing transaction.
    async fn update(&self, tx: &Transaction) -> RepositoryResult<()>;

    /// Newest first.
    async fn list_for_account(&self, account_id: &str) -> RepositoryResult<Vec<Transaction>>;

    /// Approvals of one transaction ordered by signature level.
    async fn approvals(&self, transaction_id: Uuid) -> RepositoryResult<Vec<Approval>>;

    /// Appends `approval` and stores `tx` as one atomic unit. Fails with
    /// `Duplicate` when the approver already signed; nothing is written then.
    async fn record_approval(&self, approval: &Approval, tx: &Transaction) -> RepositoryResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAccount {
    pub id: String,
    pub name: String,
    pub vault_id: Option<String>,
}

/// Funding-account balances, supplied by the account service.
///
/// Outbound payments reserve their total at creation; the reservation is
/// captured once on completion or released on failure.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn get(&self, account_id: &str) -> Result<FundingAccount, PaymentError>;

    /// Balance minus outstanding reservations.
    async fn available(&self, account_id: &str, currency: Currency)
        -> Result<BigDecimal, PaymentError>;

    async fn reserve(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError>;

    async fn release(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError>;

    async fn capture(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError>;

    async fn credit(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError>;
}

/// The acting user as resolved by the session/identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approver {
    pub id: String,
    pub name: String,
    pub account_id: String,
    pub can_approve: bool,
    /// Credential proving possession of this approver's key share.
    pub key_share: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn approver(&self, approver_id: &str) -> Option<Approver>;
}
