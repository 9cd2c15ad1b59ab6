//! Postgres implementation of PaymentRepository.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Approval, PaymentReferences, Recipient, Transaction};
use crate::ports::{PaymentRepository, RepositoryError, RepositoryResult};

const TRANSACTION_COLUMNS: &str = r#"
    id, account_id, kind, currency, amount, status, required_signatures,
    collected_signatures, recipient_name, recipient_account, invoice_number,
    shipment_number, description, service_fee, network_fee, initiated_by,
    custody_transaction_id, blockchain_reference, created_at, updated_at
"#;

/// Postgres-backed payment repository.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO payment_transactions ({TRANSACTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(&tx.account_id)
        .bind(tx.kind.as_str())
        .bind(tx.currency.as_str())
        .bind(&tx.amount)
        .bind(tx.status.to_string())
        .bind(tx.required_signatures as i32)
        .bind(tx.collected_signatures as i32)
        .bind(&tx.recipient.name)
        .bind(&tx.recipient.account)
        .bind(&tx.references.invoice_number)
        .bind(&tx.references.shipment_number)
        .bind(&tx.references.description)
        .bind(&tx.service_fee)
        .bind(&tx.network_fee)
        .bind(&tx.initiated_by)
        .bind(&tx.custody_transaction_id)
        .bind(&tx.blockchain_reference)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn update(&self, tx: &Transaction) -> RepositoryResult<()> {
        let result = update_query(tx).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(tx.id.to_string()));
        }
        Ok(())
    }

    async fn list_for_account(&self, account_id: &str) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE account_id = $1 ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn approvals(&self, transaction_id: Uuid) -> RepositoryResult<Vec<Approval>> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            r#"
            SELECT transaction_id, approver_id, signature_level, signature, signed_at
            FROM payment_approvals
            WHERE transaction_id = $1
            ORDER BY signature_level ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ApprovalRow::into_domain).collect())
    }

    async fn record_approval(&self, approval: &Approval, tx: &Transaction) -> RepositoryResult<()> {
        let mut db_tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO payment_approvals (transaction_id, approver_id, signature_level, signature, signed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(approval.transaction_id)
        .bind(&approval.approver_id)
        .bind(approval.signature_level as i32)
        .bind(&approval.signature)
        .bind(approval.signed_at)
        .execute(&mut *db_tx)
        .await
        .map_err(map_unique_violation)?;

        let result = update_query(tx).execute(&mut *db_tx).await?;
        if result.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Err(RepositoryError::NotFound(tx.id.to_string()));
        }

        db_tx.commit().await?;
        Ok(())
    }
}

fn update_query(tx: &Transaction) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = $2, collected_signatures = $3, custody_transaction_id = $4,
            blockchain_reference = $5, updated_at = $6
        WHERE id = $1
        "#,
    )
    .bind(tx.id)
    .bind(tx.status.to_string())
    .bind(tx.collected_signatures as i32)
    .bind(&tx.custody_transaction_id)
    .bind(&tx.blockchain_reference)
    .bind(tx.updated_at)
}

fn map_unique_violation(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Duplicate(db.message().to_string())
        }
        _ => RepositoryError::Database(e),
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: String,
    kind: String,
    currency: String,
    amount: bigdecimal::BigDecimal,
    status: String,
    required_signatures: i32,
    collected_signatures: i32,
    recipient_name: String,
    recipient_account: String,
    invoice_number: Option<String>,
    shipment_number: Option<String>,
    description: Option<String>,
    service_fee: bigdecimal::BigDecimal,
    network_fee: bigdecimal::BigDecimal,
    initiated_by: String,
    custody_transaction_id: Option<String>,
    blockchain_reference: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            account_id: self.account_id,
            kind: self.kind.parse().map_err(RepositoryError::Corrupt)?,
            currency: self.currency.parse().map_err(RepositoryError::Corrupt)?,
            amount: self.amount,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            required_signatures: self.required_signatures as u32,
            collected_signatures: self.collected_signatures as u32,
            recipient: Recipient {
                name: self.recipient_name,
                account: self.recipient_account,
            },
            references: PaymentReferences {
                invoice_number: self.invoice_number,
                shipment_number: self.shipment_number,
                description: self.description,
            },
            service_fee: self.service_fee,
            network_fee: self.network_fee,
            initiated_by: self.initiated_by,
            custody_transaction_id: self.custody_transaction_id,
            blockchain_reference: self.blockchain_reference,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ApprovalRow {
    transaction_id: Uuid,
    approver_id: String,
    signature_level: i32,
    signature: String,
    signed_at: chrono::DateTime<chrono::Utc>,
}

impl ApprovalRow {
    fn into_domain(self) -> Approval {
        Approval {
            transaction_id: self.transaction_id,
            approver_id: self.approver_id,
            signature_level: self.signature_level as u32,
            signature: self.signature,
            signed_at: self.signed_at,
        }
    }
}
