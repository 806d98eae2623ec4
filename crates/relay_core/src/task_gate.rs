use std::{
    collections::HashSet,
    fmt::{Debug, Display},
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Single-flight guard for named background operations.
///
/// Each key owns one slot. A trigger that finds its slot taken is dropped, not
/// queued.
pub struct TaskGate<K> {
    running: Arc<Mutex<HashSet<K>>>,
}

struct Slot<K: Eq + Hash> {
    running: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for Slot<K> {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.key);
    }
}

fn lock<K>(running: &Mutex<HashSet<K>>) -> MutexGuard<'_, HashSet<K>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K> Default for TaskGate<K> {
    fn default() -> Self {
        Self {
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K> TaskGate<K>
where
    K: Debug + Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, key: &K) -> bool {
        lock(&self.running).contains(key)
    }

    fn try_acquire(&self, key: K) -> Option<Slot<K>> {
        let mut running = lock(&self.running);
        if !running.insert(key.clone()) {
            return None;
        }
        Some(Slot {
            running: Arc::clone(&self.running),
            key,
        })
    }

    /// Spawns `task` unless an execution for `key` is already in flight.
    ///
    /// The slot is released when the task finishes, fails, panics or is
    /// cancelled. Failures are logged and go no further.
    pub fn try_run<F, E>(&self, key: K, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Some(slot) = self.try_acquire(key.clone()) else {
            info!(task = ?key, "background task already in progress; ignoring trigger");
            return None;
        };

        info!(task = ?key, "background task started");
        Some(tokio::spawn(async move {
            let _slot = slot;
            match task.await {
                Ok(()) => debug!(task = ?key, "background task finished"),
                Err(err) => warn!(task = ?key, error = %err, "background task failed"),
            }
        }))
    }
}

#[cfg(test)]
#[path = "tests/task_gate_tests.rs"]
mod tests;
