use crate::core::Result;
use crate::topo::{LockHandle, ShardLockKey, TopoServer};
use log::warn;
use std::sync::Arc;
use std::time::Duration;

/// Scoped ownership of a rebuild lock.
///
/// Release it with [`ShardLockGuard::release`]. A guard dropped while still holding the lock
/// (early return, cancelled future, panic) schedules the unlock on the current tokio runtime.
pub struct ShardLockGuard {
    topo: Arc<dyn TopoServer>,
    handle: Option<LockHandle>,
}

impl ShardLockGuard {
    pub async fn acquire(
        topo: Arc<dyn TopoServer>,
        key: &ShardLockKey,
        timeout: Duration,
        action: &str,
    ) -> Result<Self> {
        let handle = topo.lock_shard(key, timeout, action).await?;
        Ok(Self {
            topo,
            handle: Some(handle),
        })
    }

    pub fn key(&self) -> Option<&ShardLockKey> {
        self.handle.as_ref().map(|handle| &handle.key)
    }

    pub async fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.topo.unlock_shard(handle).await,
            None => Ok(()),
        }
    }
}

impl Drop for ShardLockGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let key = handle.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let topo = Arc::clone(&self.topo);
                runtime.spawn(async move {
                    if let Err(err) = topo.unlock_shard(handle).await {
                        warn!("Deferred unlock of {} failed: {}", key, err);
                    }
                });
            }
            Err(_) => warn!("Lock {} dropped outside a tokio runtime and was not released", key),
        }
    }
}
