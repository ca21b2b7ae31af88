//! Topology store seam.
//!
//! `TopoServer` is the contract the rebuild engine consumes. Production deployments back it
//! with a distributed store; [`MemoryTopoServer`] is the in-process implementation used by
//! tests and by `topo-tool`.

mod memory;

pub use memory::{MemoryTopoServer, MemoryTopoStats, TopologySnapshot};

use crate::core::{EndpointSet, Keyspace, Result, Shard, Tablet, TabletAlias, TabletRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a rebuild lock.
///
/// With `cell` set the lock covers one cell of the shard, otherwise the whole shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardLockKey {
    pub keyspace: String,
    pub shard: String,
    pub cell: Option<String>,
}

impl ShardLockKey {
    pub fn for_shard(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            cell: None,
        }
    }

    pub fn for_cell(
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        cell: impl Into<String>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            cell: Some(cell.into()),
        }
    }
}

impl fmt::Display for ShardLockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell {
            Some(cell) => write!(f, "{}/{}/{}", cell, self.keyspace, self.shard),
            None => write!(f, "{}/{}", self.keyspace, self.shard),
        }
    }
}

/// Token proving ownership of a [`ShardLockKey`]. Hand it back to `unlock_shard`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub id: Uuid,
    pub key: ShardLockKey,
    pub acquired_at: DateTime<Utc>,
    pub action: String,
}

impl LockHandle {
    pub fn new(key: ShardLockKey, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            acquired_at: Utc::now(),
            action: action.into(),
        }
    }
}

/// Read/write/lock primitives of the topology store.
///
/// Reads of missing records fail with `TopoError::NotFound`. The store gives no transactional
/// guarantees across records; callers serialize through `lock_shard`.
#[async_trait]
pub trait TopoServer: Send + Sync {
    async fn create_keyspace(&self, keyspace: &Keyspace) -> Result<()>;

    async fn get_keyspace(&self, keyspace: &str) -> Result<Keyspace>;

    async fn get_keyspace_names(&self) -> Result<Vec<String>>;

    async fn create_shard(&self, shard: &Shard) -> Result<()>;

    async fn update_shard(&self, shard: &Shard) -> Result<()>;

    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<Shard>;

    async fn get_shard_names(&self, keyspace: &str) -> Result<Vec<String>>;

    async fn create_tablet(&self, tablet: &Tablet) -> Result<()>;

    async fn update_tablet(&self, tablet: &Tablet) -> Result<()>;

    async fn get_tablet(&self, alias: &TabletAlias) -> Result<Tablet>;

    /// Tablets recorded for the shard in `cell`. A cell without tablets yields `NotFound`.
    async fn get_tablets(&self, keyspace: &str, shard: &str, cell: &str) -> Result<Vec<Tablet>>;

    async fn get_known_cells(&self) -> Result<Vec<String>>;

    async fn get_endpoint_set(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        role: TabletRole,
    ) -> Result<EndpointSet>;

    /// Creates or replaces the record addressed by the set's own identity.
    async fn set_endpoint_set(&self, endpoints: &EndpointSet) -> Result<()>;

    /// Idempotent delete. Returns `false` when there was nothing to delete.
    async fn delete_endpoint_set(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        role: TabletRole,
    ) -> Result<bool>;

    /// Roles that currently have an endpoint set for the shard in `cell`.
    async fn get_endpoint_set_roles(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
    ) -> Result<Vec<TabletRole>>;

    /// Blocks up to `timeout` for exclusive ownership of `key`.
    async fn lock_shard(
        &self,
        key: &ShardLockKey,
        timeout: Duration,
        action: &str,
    ) -> Result<LockHandle>;

    async fn unlock_shard(&self, handle: LockHandle) -> Result<()>;
}
