use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Owned entity store keyed by generated ids, one lock per entity.
///
/// Operations on different entities never contend; callers hold the
/// per-entity mutex for the duration of a read-modify-write.
pub struct EntityStore<T> {
    prefix: &'static str,
    sequence: AtomicU64,
    entries: DashMap<String, Arc<Mutex<T>>>,
}

impl<T> EntityStore<T> {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            sequence: AtomicU64::new(0),
            entries: DashMap::new(),
        }
    }

    /// Allocates the next id, e.g. `vault_000001`.
    pub fn next_id(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{:06}", self.prefix, n)
    }

    pub fn insert(&self, id: String, value: T) -> Arc<Mutex<T>> {
        let handle = Arc::new(Mutex::new(value));
        self.entries.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<T>>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
