use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// Background tasks keyed by the entity they belong to.
///
/// Every deferred completion (confirmation timers, settlement watchers) is
/// registered here instead of being detached, so it can be awaited, cancelled
/// with its entity, or aborted wholesale on shutdown.
pub struct TaskRegistry<K> {
    name: &'static str,
    tasks: Mutex<HashMap<K, JoinHandle<()>>>,
}

impl<K> TaskRegistry<K>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns `task` for `key`, replacing (and aborting) any previous task.
    pub fn spawn<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut tasks = self.lock();
        tasks.retain(|_, h| !h.is_finished());
        if let Some(previous) = tasks.insert(key.clone(), handle) {
            tracing::debug!(registry = self.name, key = %key, "Replacing scheduled task");
            previous.abort();
        }
    }

    /// Aborts the task for `key`. Returns whether one was still running.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Waits for the task registered under `key` to finish.
    /// Returns `false` when nothing was registered.
    pub async fn wait(&self, key: &K) -> bool {
        let handle = self.lock().remove(key);
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        tracing::error!(registry = self.name, key = %key, "Scheduled task panicked: {}", e);
                    }
                }
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        if !drained.is_empty() {
            tracing::info!(registry = self.name, tasks = drained.len(), "Aborting scheduled tasks");
        }
        for (_, handle) in drained {
            handle.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
