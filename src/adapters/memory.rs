//! In-memory implementation of PaymentRepository.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{Approval, Transaction};
use crate::ports::{PaymentRepository, RepositoryError, RepositoryResult};

struct PaymentEntry {
    transaction: Transaction,
    approvals: Vec<Approval>,
}

/// Each transaction lives with its approvals in one map entry, so an
/// approval and the counter it advances are written under the same lock.
#[derive(Default)]
pub struct InMemoryPaymentRepository {
    entries: DashMap<Uuid, PaymentEntry>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        match self.entries.entry(tx.id) {
            Entry::Occupied(_) => Err(RepositoryError::Duplicate(format!("transaction {}", tx.id))),
            Entry::Vacant(slot) => {
                slot.insert(PaymentEntry {
                    transaction: tx.clone(),
                    approvals: Vec::new(),
                });
                Ok(tx.clone())
            }
        }
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Transaction> {
        self.entries
            .get(&id)
            .map(|entry| entry.transaction.clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update(&self, tx: &Transaction) -> RepositoryResult<()> {
        let mut entry = self
            .entries
            .get_mut(&tx.id)
            .ok_or_else(|| RepositoryError::NotFound(tx.id.to_string()))?;
        entry.transaction = tx.clone();
        Ok(())
    }

    async fn list_for_account(&self, account_id: &str) -> RepositoryResult<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .entries
            .iter()
            .filter(|entry| entry.transaction.account_id == account_id)
            .map(|entry| entry.transaction.clone())
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    async fn approvals(&self, transaction_id: Uuid) -> RepositoryResult<Vec<Approval>> {
        let entry = self
            .entries
            .get(&transaction_id)
            .ok_or_else(|| RepositoryError::NotFound(transaction_id.to_string()))?;
        let mut approvals = entry.approvals.clone();
        approvals.sort_by_key(|a| a.signature_level);
        Ok(approvals)
    }

    async fn record_approval(&self, approval: &Approval, tx: &Transaction) -> RepositoryResult<()> {
        let mut entry = self
            .entries
            .get_mut(&approval.transaction_id)
            .ok_or_else(|| RepositoryError::NotFound(approval.transaction_id.to_string()))?;

        if entry
            .approvals
            .iter()
            .any(|a| a.approver_id == approval.approver_id)
        {
            return Err(RepositoryError::Duplicate(format!(
                "approval by {} on {}",
                approval.approver_id, approval.transaction_id
            )));
        }

        entry.approvals.push(approval.clone());
        entry.transaction = tx.clone();
        Ok(())
    }
}
