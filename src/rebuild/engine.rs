use super::hook::{LockHook, NoopLockHook};
use super::lock::ShardLockGuard;
use super::progress::{RebuildPhase, RebuildProgress};
use super::reader::TabletDirectory;
use crate::core::{Result, TabletRole, TopoError};
use crate::serving::{CellServingGraph, build_cell_serving_graph};
use crate::topo::{ShardLockKey, TopoServer};
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// Result of one successful cell rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRebuildOutcome {
    pub cell: String,
    /// Roles whose endpoint set was written (created or replaced).
    pub published: Vec<TabletRole>,
    /// Roles whose endpoint set was removed because no serving tablet holds them any more.
    pub deleted: Vec<TabletRole>,
}

impl CellRebuildOutcome {
    pub fn changed(&self) -> bool {
        !self.published.is_empty() || !self.deleted.is_empty()
    }
}

/// Recomputes and publishes the serving graph of a shard, one cell at a time.
///
/// Every rebuild reads tablet membership only after it holds the lock, so whichever of two
/// overlapping rebuilds locks last publishes a graph that reflects every mutation made before
/// its read, regardless of which one finishes last.
#[derive(Clone)]
pub struct RebuildEngine {
    topo: Arc<dyn TopoServer>,
    directory: TabletDirectory,
    lock_hook: Arc<dyn LockHook>,
    action_name: String,
}

impl RebuildEngine {
    pub fn new(topo: Arc<dyn TopoServer>) -> Self {
        Self {
            directory: TabletDirectory::new(Arc::clone(&topo)),
            topo,
            lock_hook: Arc::new(NoopLockHook),
            action_name: "RebuildShard".to_string(),
        }
    }

    pub fn with_lock_hook(mut self, hook: Arc<dyn LockHook>) -> Self {
        self.lock_hook = hook;
        self
    }

    pub fn with_action_name(mut self, action_name: impl Into<String>) -> Self {
        self.action_name = action_name.into();
        self
    }

    pub fn topo(&self) -> &Arc<dyn TopoServer> {
        &self.topo
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    async fn lock(&self, key: &ShardLockKey, timeout: Duration) -> Result<ShardLockGuard> {
        self.lock_hook.before_lock(key).await;
        ShardLockGuard::acquire(Arc::clone(&self.topo), key, timeout, &self.action_name).await
    }

    /// Rebuilds one cell under its own `(keyspace, shard, cell)` lock.
    pub async fn rebuild_cell(
        &self,
        keyspace: &str,
        shard: &str,
        cell: &str,
        lock_timeout: Duration,
        progress: &RebuildProgress,
    ) -> Result<CellRebuildOutcome> {
        let span = info_span!("rebuild.cell", keyspace = %keyspace, shard = %shard, cell = %cell);
        async {
            progress.set_phase(cell, RebuildPhase::Locking);
            let key = ShardLockKey::for_cell(keyspace, shard, cell);
            let guard = match self.lock(&key, lock_timeout).await {
                Ok(guard) => guard,
                Err(err) => {
                    progress.set_phase(cell, RebuildPhase::Failed);
                    event!(Level::ERROR, error = %err, "rebuild lock not acquired");
                    return Err(err);
                }
            };

            let outcome = self.rebuild_cell_locked(keyspace, shard, cell, progress).await;
            let outcome = release_after(guard, outcome).await;
            record_outcome(cell, &outcome, progress);
            outcome
        }
        .instrument(span)
        .await
    }

    /// Takes one `(keyspace, shard)` lock and rebuilds every cell serially under it.
    ///
    /// Cells fail independently; a lock or unlock failure is reported against every cell it
    /// affected.
    pub async fn rebuild_cells_under_shard_lock(
        &self,
        keyspace: &str,
        shard: &str,
        cells: &[String],
        lock_timeout: Duration,
        progress: &RebuildProgress,
    ) -> Vec<(String, Result<CellRebuildOutcome>)> {
        let span = info_span!("rebuild.shard", keyspace = %keyspace, shard = %shard);
        async {
            for cell in cells {
                progress.set_phase(cell, RebuildPhase::Locking);
            }
            let key = ShardLockKey::for_shard(keyspace, shard);
            let guard = match self.lock(&key, lock_timeout).await {
                Ok(guard) => guard,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "rebuild lock not acquired");
                    return cells
                        .iter()
                        .map(|cell| {
                            progress.set_phase(cell, RebuildPhase::Failed);
                            (cell.clone(), Err(err.clone()))
                        })
                        .collect();
                }
            };

            let mut results = Vec::with_capacity(cells.len());
            for cell in cells {
                let outcome = self
                    .rebuild_cell_locked(keyspace, shard, cell, progress)
                    .instrument(info_span!("rebuild.cell", cell = %cell))
                    .await;
                results.push((cell.clone(), outcome));
            }

            if let Err(unlock_err) = guard.release().await {
                event!(Level::ERROR, error = %unlock_err, "rebuild unlock failed");
                for (_, outcome) in results.iter_mut() {
                    if outcome.is_ok() {
                        *outcome = Err(unlock_err.clone());
                    }
                }
            }
            for (cell, outcome) in &results {
                record_outcome(cell, outcome, progress);
            }
            results
        }
        .instrument(span)
        .await
    }

    /// Read, compute and publish for one cell. The caller holds the lock covering `cell`.
    async fn rebuild_cell_locked(
        &self,
        keyspace: &str,
        shard: &str,
        cell: &str,
        progress: &RebuildProgress,
    ) -> Result<CellRebuildOutcome> {
        progress.set_phase(cell, RebuildPhase::Reading);
        event!(Level::DEBUG, "reading shard membership");
        let tablets = match self.topo.get_shard(keyspace, shard).await {
            Ok(record) => {
                if !record.has_cell(cell) {
                    return Err(TopoError::UnknownCell {
                        keyspace: keyspace.to_string(),
                        shard: shard.to_string(),
                        cell: cell.to_string(),
                    });
                }
                self.directory.tablets_for_cell(keyspace, shard, cell).await?
            }
            // A deleted shard has no members; its stale endpoint sets still get cleaned up.
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };

        progress.set_phase(cell, RebuildPhase::Computing);
        event!(Level::DEBUG, tablets = tablets.len(), "computing serving graph");
        let graph = build_cell_serving_graph(cell, keyspace, shard, &tablets);

        progress.set_phase(cell, RebuildPhase::Publishing);
        self.publish(&graph).await
    }

    /// Makes the stored endpoint sets of the graph's cell match `graph` exactly.
    ///
    /// Unchanged sets are not rewritten, so a repeated rebuild reports no change. Each role is
    /// its own record and there is no cross-role transaction: writes go in role order and stop
    /// at the first failure, so roles written before it stay written and the cell is reported
    /// failed. Rerunning the rebuild completes the remaining roles.
    async fn publish(&self, graph: &CellServingGraph) -> Result<CellRebuildOutcome> {
        let (cell, keyspace, shard) = (&graph.cell, &graph.keyspace, &graph.shard);
        let existing_roles = self
            .topo
            .get_endpoint_set_roles(cell, keyspace, shard)
            .await?;

        let mut published = Vec::new();
        for endpoints in graph.endpoint_sets() {
            match self
                .topo
                .get_endpoint_set(cell, keyspace, shard, endpoints.role)
                .await
            {
                Ok(current) if current == endpoints => continue,
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            self.topo.set_endpoint_set(&endpoints).await?;
            published.push(endpoints.role);
        }

        let mut deleted = Vec::new();
        for role in existing_roles {
            if graph.endpoints(role).is_some() {
                continue;
            }
            if self
                .topo
                .delete_endpoint_set(cell, keyspace, shard, role)
                .await?
            {
                deleted.push(role);
            }
        }

        let outcome = CellRebuildOutcome {
            cell: cell.clone(),
            published,
            deleted,
        };
        event!(
            Level::INFO,
            changed = outcome.changed(),
            published = ?outcome.published,
            deleted = ?outcome.deleted,
            "serving graph published"
        );
        Ok(outcome)
    }
}

/// Releases `guard` whatever `outcome` is. An unlock failure only replaces a successful
/// outcome; after a rebuild error it is logged and the rebuild error wins.
async fn release_after<T>(guard: ShardLockGuard, outcome: Result<T>) -> Result<T> {
    let key = guard.key().map(ToString::to_string).unwrap_or_default();
    match (outcome, guard.release().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(unlock_err)) => {
            event!(Level::ERROR, error = %unlock_err, "rebuild unlock failed");
            Err(unlock_err)
        }
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(unlock_err)) => {
            warn!("Unlock of {} failed after rebuild error: {}", key, unlock_err);
            Err(err)
        }
    }
}

fn record_outcome(cell: &str, outcome: &Result<CellRebuildOutcome>, progress: &RebuildProgress) {
    match outcome {
        Ok(_) => progress.set_phase(cell, RebuildPhase::Done),
        Err(err) => {
            progress.set_phase(cell, RebuildPhase::Failed);
            event!(Level::ERROR, cell = %cell, error = %err, "cell rebuild failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Keyspace, Shard, Tablet, TabletAlias};
    use crate::topo::MemoryTopoServer;

    async fn seeded(cells: &[&str]) -> MemoryTopoServer {
        let topo = MemoryTopoServer::new();
        topo.create_keyspace(&Keyspace::new("ks")).await.unwrap();
        let mut shard = Shard::new("ks", "0").unwrap();
        for cell in cells {
            shard.add_cell(*cell);
        }
        topo.create_shard(&shard).await.unwrap();
        topo
    }

    async fn add_tablet(topo: &MemoryTopoServer, cell: &str, uid: u32, role: TabletRole) {
        topo.create_tablet(&Tablet::new(
            TabletAlias::new(cell, uid),
            format!("{}bsr{}", cell, uid),
            "ks",
            "0",
            role,
        ))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_cell_publishes_and_releases_lock() {
        let topo = seeded(&["nj"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        add_tablet(&topo, "nj", 2, TabletRole::Replica).await;
        let engine = RebuildEngine::new(Arc::new(topo.clone()));
        let progress = RebuildProgress::new();

        let outcome = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &progress)
            .await
            .unwrap();

        assert_eq!(outcome.published, vec![TabletRole::Master, TabletRole::Replica]);
        assert!(outcome.deleted.is_empty());
        assert_eq!(progress.phase("nj"), Some(RebuildPhase::Done));
        assert!(!topo.is_locked(&ShardLockKey::for_cell("ks", "0", "nj")));
    }

    #[tokio::test]
    async fn test_unknown_cell_is_rejected_and_unlocked() {
        let topo = seeded(&["nj"]).await;
        let engine = RebuildEngine::new(Arc::new(topo.clone()));

        let err = engine
            .rebuild_cell("ks", "0", "ny", Duration::from_secs(1), &RebuildProgress::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TopoError::UnknownCell { ref cell, .. } if cell == "ny"));
        assert!(!topo.is_locked(&ShardLockKey::for_cell("ks", "0", "ny")));
    }

    #[tokio::test]
    async fn test_read_failure_releases_lock() {
        let topo = seeded(&["nj"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        topo.fail_tablet_reads_in_cell("nj");
        let engine = RebuildEngine::new(Arc::new(topo.clone()));
        let progress = RebuildProgress::new();

        let err = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, TopoError::StoreRead(_)));
        assert_eq!(progress.phase("nj"), Some(RebuildPhase::Failed));
        assert_eq!(topo.stats().locks_acquired, topo.stats().locks_released);
        assert_eq!(topo.stats().endpoint_writes, 0);
    }

    #[tokio::test]
    async fn test_missing_shard_deletes_stale_sets() {
        let topo = MemoryTopoServer::new();
        topo.set_endpoint_set(&crate::core::EndpointSet {
            cell: "nj".to_string(),
            keyspace: "ks".to_string(),
            shard: "0".to_string(),
            role: TabletRole::Replica,
            entries: Vec::new(),
        })
        .await
        .unwrap();
        let engine = RebuildEngine::new(Arc::new(topo.clone()));

        let outcome = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &RebuildProgress::new())
            .await
            .unwrap();

        assert_eq!(outcome.deleted, vec![TabletRole::Replica]);
        assert!(
            topo.get_endpoint_set("nj", "ks", "0", TabletRole::Replica)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_shard_lock_rebuilds_cells_independently() {
        let topo = seeded(&["nj", "ny"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        add_tablet(&topo, "ny", 2, TabletRole::Replica).await;
        topo.fail_endpoint_writes_in_cell("ny");
        let engine = RebuildEngine::new(Arc::new(topo.clone()));
        let cells = vec!["nj".to_string(), "ny".to_string()];

        let results = engine
            .rebuild_cells_under_shard_lock("ks", "0", &cells, Duration::from_secs(1), &RebuildProgress::new())
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].1.as_ref().unwrap().changed());
        assert!(matches!(results[1].1, Err(TopoError::StoreWrite(_))));
        assert_eq!(topo.stats().locks_acquired, 1);
        assert!(!topo.is_locked(&ShardLockKey::for_shard("ks", "0")));
    }

    #[tokio::test]
    async fn test_unlock_failure_after_publish_fails_cell() {
        let topo = seeded(&["nj"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        topo.fail_unlocks();
        let engine = RebuildEngine::new(Arc::new(topo.clone()));
        let progress = RebuildProgress::new();

        let err = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, TopoError::LockError(_)));
        assert_eq!(progress.phase("nj"), Some(RebuildPhase::Failed));
        // The graph itself was published before the unlock.
        assert!(
            topo.get_endpoint_set("nj", "ks", "0", TabletRole::Master)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_rebuild_error_wins_over_unlock_failure() {
        let topo = seeded(&["nj"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        topo.fail_tablet_reads_in_cell("nj");
        topo.fail_unlocks();
        let engine = RebuildEngine::new(Arc::new(topo.clone()));

        let err = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &RebuildProgress::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TopoError::StoreRead(_)));
    }

    #[tokio::test]
    async fn test_shard_lock_unlock_failure_only_replaces_successes() {
        let topo = seeded(&["nj", "ny"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        add_tablet(&topo, "ny", 2, TabletRole::Replica).await;
        topo.fail_endpoint_writes_in_cell("ny");
        topo.fail_unlocks();
        let engine = RebuildEngine::new(Arc::new(topo.clone()));
        let cells = vec!["nj".to_string(), "ny".to_string()];
        let progress = RebuildProgress::new();

        let results = engine
            .rebuild_cells_under_shard_lock("ks", "0", &cells, Duration::from_secs(1), &progress)
            .await;

        assert!(matches!(results[0].1, Err(TopoError::LockError(_))));
        assert!(matches!(results[1].1, Err(TopoError::StoreWrite(_))));
        assert_eq!(progress.phase("nj"), Some(RebuildPhase::Failed));
        assert_eq!(progress.phase("ny"), Some(RebuildPhase::Failed));
    }

    #[tokio::test]
    async fn test_shard_lock_timeout_fails_every_cell() {
        let topo = seeded(&["nj", "ny"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        add_tablet(&topo, "ny", 2, TabletRole::Replica).await;
        let held = topo
            .lock_shard(&ShardLockKey::for_shard("ks", "0"), Duration::from_secs(1), "other")
            .await
            .unwrap();
        let engine = RebuildEngine::new(Arc::new(topo.clone()));
        let cells = vec!["nj".to_string(), "ny".to_string()];
        let progress = RebuildProgress::new();

        let results = engine
            .rebuild_cells_under_shard_lock("ks", "0", &cells, Duration::from_millis(30), &progress)
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, outcome)| {
            matches!(outcome, Err(err) if err.is_lock_timeout())
        }));
        assert_eq!(progress.phase("ny"), Some(RebuildPhase::Failed));
        assert_eq!(topo.stats().endpoint_writes, 0);
        topo.unlock_shard(held).await.unwrap();
    }

    #[tokio::test]
    async fn test_cell_rebuild_waits_for_shard_lock() {
        let topo = seeded(&["nj"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        let held = topo
            .lock_shard(&ShardLockKey::for_shard("ks", "0"), Duration::from_secs(1), "other")
            .await
            .unwrap();
        let engine = RebuildEngine::new(Arc::new(topo.clone()));

        let err = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_millis(30), &RebuildProgress::new())
            .await
            .unwrap_err();

        assert!(err.is_lock_timeout());
        assert_eq!(topo.stats().endpoint_writes, 0);
        topo.unlock_shard(held).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_role_write_keeps_earlier_roles() {
        let topo = seeded(&["nj"]).await;
        add_tablet(&topo, "nj", 1, TabletRole::Master).await;
        add_tablet(&topo, "nj", 2, TabletRole::Replica).await;
        topo.fail_endpoint_writes_for_role("nj", TabletRole::Replica);
        let engine = RebuildEngine::new(Arc::new(topo.clone()));

        let err = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &RebuildProgress::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TopoError::StoreWrite(_)));
        assert_eq!(
            topo.get_endpoint_set_roles("nj", "ks", "0").await.unwrap(),
            vec![TabletRole::Master]
        );

        topo.clear_faults();
        let outcome = engine
            .rebuild_cell("ks", "0", "nj", Duration::from_secs(1), &RebuildProgress::new())
            .await
            .unwrap();
        assert_eq!(outcome.published, vec![TabletRole::Replica]);
    }
}
