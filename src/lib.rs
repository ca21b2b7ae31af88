// ============================================================================
// shardgraph: serving-graph rebuild engine
// ============================================================================
//
// Derives the per-cell serving graph (role -> endpoint list) of a shard from the
// authoritative tablet records and publishes it back into the topology store under
// a shard lock.

pub mod automation;
pub mod config;
pub mod core;
pub mod rebuild;
pub mod serving;
pub mod topo;

pub use config::{LockScope, RebuildConfig};
pub use core::{
    CellRebuildError, EndPoint, EndpointSet, EndpointSetKey, KeyRange, Keyspace,
    RebuildFailures, Result, Shard, ShardRebuildError, Tablet, TabletAlias, TabletRole,
    TopoError,
};
pub use rebuild::{
    KeyspaceRebuildReport, RebuildDriver, RebuildEngine, RebuildProgress, RebuildRequest,
    ShardRebuildReport,
};
pub use serving::{CellServingGraph, build_cell_serving_graph};
pub use topo::{LockHandle, MemoryTopoServer, ShardLockKey, TopoServer};

// ============================================================================
// Convenience entry point
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

/// Rebuilds `keyspace/shard` in `cells` with the default configuration.
///
/// Returns whether any endpoint set was written or deleted. Empty `cells` means every
/// cell listed on the shard record.
pub async fn rebuild_shard(
    topo: Arc<dyn TopoServer>,
    keyspace: &str,
    shard: &str,
    cells: &[String],
    lock_timeout: Duration,
) -> Result<bool> {
    let driver = RebuildDriver::new(RebuildEngine::new(topo), RebuildConfig::default())?;
    driver.rebuild_shard(keyspace, shard, cells, lock_timeout).await
}
