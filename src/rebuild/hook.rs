use crate::topo::ShardLockKey;
use async_trait::async_trait;

/// Called by the engine right before it asks the store for a rebuild lock.
///
/// Tests use it to stall one rebuild at the lock point while another runs. The hook belongs to
/// a single engine, so parallel tests never see each other's hooks.
#[async_trait]
pub trait LockHook: Send + Sync {
    async fn before_lock(&self, key: &ShardLockKey);
}

/// Default hook: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLockHook;

#[async_trait]
impl LockHook for NoopLockHook {
    async fn before_lock(&self, _key: &ShardLockKey) {}
}
