use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Per-upload reader/writer locks.
///
/// Chunk writes hold the shared side so distinct indices land concurrently; merge,
/// delete and expiry hold the exclusive side so nothing writes into a session while
/// it is being assembled or removed.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, upload_id: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn shared(&self, upload_id: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(upload_id).read_owned().await
    }

    pub async fn exclusive(&self, upload_id: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(upload_id).write_owned().await
    }

    /// Drop the lock entry once nobody else holds a handle to it.
    pub fn release(&self, upload_id: &str) {
        self.locks
            .remove_if(upload_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
