use super::{LockHandle, ShardLockKey, TopoServer};
use crate::core::{
    EndpointSet, EndpointSetKey, Keyspace, Result, Shard, Tablet, TabletAlias, TabletRole,
    TopoError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{
    Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use uuid::Uuid;

// In-memory store is split by concern: records, locks, faults/stats, snapshot files.
include!("memory/records.rs");
include!("memory/locks.rs");
include!("memory/faults_and_stats.rs");
include!("memory/snapshot.rs");
include!("memory/topo_impl.rs");

/// Topology store held entirely in process memory.
///
/// Cloning is cheap and every clone observes the same records and locks, which lets tests hand
/// one store to several drivers and mutate tablets while rebuilds are in flight.
#[derive(Clone, Default)]
pub struct MemoryTopoServer {
    data: Arc<RwLock<MemoryTopoData>>,
    locks: Arc<std::sync::Mutex<MemoryLockTable>>,
    faults: Arc<std::sync::Mutex<MemoryTopoFaults>>,
    counters: Arc<MemoryTopoCounters>,
}

impl MemoryTopoServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already knows `cells`, mirroring a freshly provisioned deployment.
    pub fn with_cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut data = MemoryTopoData::default();
        data.extra_cells
            .extend(cells.into_iter().map(|cell| cell.into()));
        Self {
            data: Arc::new(RwLock::new(data)),
            ..Self::default()
        }
    }

    pub async fn add_cell(&self, cell: impl Into<String>) {
        let mut data = self.data.write().await;
        data.extra_cells.insert(cell.into());
    }
}
