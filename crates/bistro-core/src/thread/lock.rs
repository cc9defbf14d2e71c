//! Per-thread serialization.
//!
//! Each thread id maps to its own async mutex. Holding the guard gives one
//! turn exclusive use of that thread's log and checkpoint; other thread ids
//! are unaffected. A second message for a busy thread waits its turn.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ThreadLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive access to one thread; released on drop.
pub type ThreadGuard = OwnedMutexGuard<()>;

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `thread_id` is free, then hold it.
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        // clone the Arc out so the map shard is not locked while waiting
        let lock = self
            .locks
            .entry(thread_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.locks
            .get(thread_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    pub fn thread_count(&self) -> usize {
        self.locks.len()
    }

    /// Forget the lock of `thread_id` once nobody holds or waits on it.
    ///
    /// Call after dropping the guard. Waiters hold their own `Arc`, and
    /// `acquire` clones under the shard lock, so a count of one means idle.
    pub fn release(&self, thread_id: &str) {
        self.locks
            .remove_if(thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
