use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-transaction critical section.
///
/// Every read-modify-write of a transaction and its approvals happens while
/// holding the guard for that transaction id. Distinct ids never contend.
#[derive(Default)]
pub struct TransactionLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl TransactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, transaction_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let lock = self
            .locks
            .entry(transaction_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops the lock for a transaction that can no longer change.
    pub fn forget(&self, transaction_id: Uuid) {
        self.locks
            .remove_if(&transaction_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_transaction_is_serialized() {
        let locks = Arc::new(TransactionLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_transactions_do_not_contend() {
        let locks = TransactionLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_forget_keeps_held_locks() {
        let locks = TransactionLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        locks.forget(id);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget(id);
        assert!(locks.is_empty());
    }
}
