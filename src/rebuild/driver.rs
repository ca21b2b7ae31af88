use super::engine::{CellRebuildOutcome, RebuildEngine};
use super::progress::RebuildProgress;
use crate::config::{LockScope, RebuildConfig};
use crate::core::{CellRebuildError, RebuildFailures, Result, ShardRebuildError, TopoError};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{Level, event};

/// Parameters of one `rebuild_shard_detailed` call.
#[derive(Debug, Clone)]
pub struct RebuildRequest {
    pub keyspace: String,
    pub shard: String,
    /// Cells to rebuild. Empty means every cell listed on the shard record.
    pub cells: Vec<String>,
    /// Overrides `RebuildConfig::lock_timeout`.
    pub lock_timeout: Option<Duration>,
    pub progress: RebuildProgress,
}

impl RebuildRequest {
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            cells: Vec::new(),
            lock_timeout: None,
            progress: RebuildProgress::new(),
        }
    }

    pub fn cells(mut self, cells: Vec<String>) -> Self {
        self.cells = cells;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn progress(mut self, progress: RebuildProgress) -> Self {
        self.progress = progress;
        self
    }
}

/// Per-cell results of rebuilding one shard.
#[derive(Debug, Clone)]
pub struct ShardRebuildReport {
    pub keyspace: String,
    pub shard: String,
    pub succeeded: Vec<CellRebuildOutcome>,
    pub failed: Vec<CellRebuildError>,
}

impl ShardRebuildReport {
    fn new(keyspace: &str, shard: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record(&mut self, cell: String, outcome: Result<CellRebuildOutcome>) {
        match outcome {
            Ok(outcome) => self.succeeded.push(outcome),
            Err(source) => self.failed.push(CellRebuildError::new(
                self.keyspace.clone(),
                self.shard.clone(),
                cell,
                source,
            )),
        }
    }

    /// True when any successfully rebuilt cell wrote or deleted an endpoint set.
    pub fn changed(&self) -> bool {
        self.succeeded.iter().any(CellRebuildOutcome::changed)
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn succeeded_cells(&self) -> impl Iterator<Item = String> + '_ {
        self.succeeded
            .iter()
            .map(|outcome| format!("{}/{}/{}", self.keyspace, self.shard, outcome.cell))
    }

    /// `Ok(changed)` when every cell succeeded, otherwise `TopoError::Aggregate`.
    pub fn into_result(self) -> Result<bool> {
        if self.failed.is_empty() {
            return Ok(self.changed());
        }
        Err(TopoError::Aggregate(RebuildFailures {
            succeeded: self.succeeded_cells().collect(),
            failed: self.failed,
            ..Default::default()
        }))
    }
}

/// Per-shard results of rebuilding a whole keyspace.
#[derive(Debug, Clone)]
pub struct KeyspaceRebuildReport {
    pub keyspace: String,
    pub shards: Vec<ShardRebuildReport>,
    /// Shards whose rebuild failed before any cell was attempted.
    pub failed_shards: Vec<ShardRebuildError>,
}

impl KeyspaceRebuildReport {
    pub fn changed(&self) -> bool {
        self.shards.iter().any(ShardRebuildReport::changed)
    }

    pub fn into_result(self) -> Result<bool> {
        let changed = self.changed();
        let mut failures = RebuildFailures::default();
        for report in self.shards {
            failures.succeeded.extend(report.succeeded_cells());
            failures.failed.extend(report.failed);
        }
        failures.failed_shards = self.failed_shards;
        if failures.is_empty() {
            Ok(changed)
        } else {
            Err(TopoError::Aggregate(failures))
        }
    }
}

/// Caller-facing rebuild entry point.
///
/// Cells are independent: a failed cell never blocks or rolls back the others, and the
/// returned error names every cell that failed.
#[derive(Clone)]
pub struct RebuildDriver {
    engine: RebuildEngine,
    config: RebuildConfig,
}

impl RebuildDriver {
    pub fn new(engine: RebuildEngine, config: RebuildConfig) -> Result<Self> {
        config.validate().map_err(TopoError::InvalidArgument)?;
        let engine = engine.with_action_name(config.action_name.clone());
        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &RebuildEngine {
        &self.engine
    }

    pub fn config(&self) -> &RebuildConfig {
        &self.config
    }

    /// Rebuilds `keyspace/shard` in `cells`. Returns whether anything was written or deleted.
    pub async fn rebuild_shard(
        &self,
        keyspace: &str,
        shard: &str,
        cells: &[String],
        lock_timeout: Duration,
    ) -> Result<bool> {
        let request = RebuildRequest::new(keyspace, shard)
            .cells(cells.to_vec())
            .lock_timeout(lock_timeout);
        self.rebuild_shard_detailed(request).await?.into_result()
    }

    /// Like [`RebuildDriver::rebuild_shard`] but returns every cell's outcome.
    ///
    /// Only errors that prevent any cell from being attempted are returned as `Err`.
    pub async fn rebuild_shard_detailed(
        &self,
        request: RebuildRequest,
    ) -> Result<ShardRebuildReport> {
        let RebuildRequest {
            keyspace,
            shard,
            cells,
            lock_timeout,
            progress,
        } = request;
        if keyspace.trim().is_empty() || shard.trim().is_empty() {
            return Err(TopoError::InvalidArgument(
                "keyspace and shard must not be empty".to_string(),
            ));
        }
        let lock_timeout = lock_timeout.unwrap_or(self.config.lock_timeout);
        if lock_timeout.is_zero() {
            return Err(TopoError::InvalidArgument(
                "lock timeout must be greater than zero".to_string(),
            ));
        }

        let cells = self.resolve_cells(&keyspace, &shard, cells).await?;
        progress.start(&keyspace, &shard, &cells);
        let mut report = ShardRebuildReport::new(&keyspace, &shard);

        let results = match self.config.lock_scope {
            LockScope::PerCell => {
                self.rebuild_cells_concurrently(&keyspace, &shard, &cells, lock_timeout, &progress)
                    .await
            }
            LockScope::PerShard => {
                self.engine
                    .rebuild_cells_under_shard_lock(&keyspace, &shard, &cells, lock_timeout, &progress)
                    .await
            }
        };
        for (cell, outcome) in results {
            report.record(cell, outcome);
        }

        event!(
            Level::INFO,
            keyspace = %keyspace,
            shard = %shard,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            changed = report.changed(),
            "shard rebuild finished"
        );
        Ok(report)
    }

    /// Rebuilds every shard of `keyspace`, one shard at a time.
    ///
    /// A shard that cannot start (its record is unreadable, say) is recorded in
    /// `failed_shards` and the remaining shards still run.
    pub async fn rebuild_keyspace(
        &self,
        keyspace: &str,
        cells: &[String],
        lock_timeout: Duration,
    ) -> Result<KeyspaceRebuildReport> {
        let shard_names = self.engine.topo().get_shard_names(keyspace).await?;
        let mut report = KeyspaceRebuildReport {
            keyspace: keyspace.to_string(),
            shards: Vec::with_capacity(shard_names.len()),
            failed_shards: Vec::new(),
        };
        for shard in shard_names {
            let request = RebuildRequest::new(keyspace, shard.as_str())
                .cells(cells.to_vec())
                .lock_timeout(lock_timeout);
            match self.rebuild_shard_detailed(request).await {
                Ok(shard_report) => report.shards.push(shard_report),
                Err(source) => {
                    event!(
                        Level::WARN,
                        keyspace = %keyspace,
                        shard = %shard,
                        error = %source,
                        "shard rebuild could not start"
                    );
                    report.failed_shards.push(ShardRebuildError {
                        keyspace: keyspace.to_string(),
                        shard,
                        source,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Explicit cells are deduplicated in order; no cells means the shard record's cells.
    async fn resolve_cells(
        &self,
        keyspace: &str,
        shard: &str,
        cells: Vec<String>,
    ) -> Result<Vec<String>> {
        if cells.is_empty() {
            return match self.engine.topo().get_shard(keyspace, shard).await {
                Ok(record) => Ok(record.cells),
                Err(err) if err.is_not_found() => Ok(Vec::new()),
                Err(err) => Err(err),
            };
        }
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(cells.len());
        for cell in cells {
            let cell = cell.trim().to_string();
            if cell.is_empty() {
                return Err(TopoError::InvalidArgument(
                    "cell name must not be empty".to_string(),
                ));
            }
            if seen.insert(cell.clone()) {
                resolved.push(cell);
            }
        }
        Ok(resolved)
    }

    /// Each cell under its own lock, at most `cell_concurrency` at a time, results in input order.
    async fn rebuild_cells_concurrently(
        &self,
        keyspace: &str,
        shard: &str,
        cells: &[String],
        lock_timeout: Duration,
        progress: &RebuildProgress,
    ) -> Vec<(String, Result<CellRebuildOutcome>)> {
        let engine = &self.engine;
        let mut results = stream::iter(cells.iter().cloned().enumerate())
            .map(move |(index, cell)| async move {
                let outcome = engine
                    .rebuild_cell(keyspace, shard, &cell, lock_timeout, progress)
                    .await;
                (index, cell, outcome)
            })
            .buffer_unordered(self.config.cell_concurrency)
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, cell, outcome)| (cell, outcome))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Keyspace, Shard, Tablet, TabletAlias, TabletRole};
    use crate::topo::{MemoryTopoServer, TopoServer};
    use std::sync::Arc;

    async fn seeded() -> MemoryTopoServer {
        let topo = MemoryTopoServer::new();
        topo.create_keyspace(&Keyspace::new("ks")).await.unwrap();
        for name in ["-80", "80-"] {
            let mut shard = Shard::new("ks", name).unwrap();
            shard.add_cell("nj");
            shard.add_cell("ny");
            topo.create_shard(&shard).await.unwrap();
            for (cell, uid) in [("nj", 1), ("ny", 2)] {
                let uid = if name == "-80" { uid } else { uid + 100 };
                topo.create_tablet(&Tablet::new(
                    TabletAlias::new(cell, uid),
                    format!("host{}", uid),
                    "ks",
                    name,
                    TabletRole::Replica,
                ))
                .await
                .unwrap();
            }
        }
        topo
    }

    fn driver(topo: &MemoryTopoServer, config: RebuildConfig) -> RebuildDriver {
        RebuildDriver::new(RebuildEngine::new(Arc::new(topo.clone())), config).unwrap()
    }

    #[tokio::test]
    async fn test_empty_cell_list_uses_shard_cells() {
        let topo = seeded().await;
        let driver = driver(&topo, RebuildConfig::default());

        let report = driver
            .rebuild_shard_detailed(RebuildRequest::new("ks", "-80"))
            .await
            .unwrap();

        let cells = report
            .succeeded
            .iter()
            .map(|outcome| outcome.cell.as_str())
            .collect::<Vec<_>>();
        assert_eq!(cells, vec!["nj", "ny"]);
        assert!(report.changed());
    }

    #[tokio::test]
    async fn test_duplicate_cells_are_rebuilt_once() {
        let topo = seeded().await;
        let driver = driver(&topo, RebuildConfig::default());
        let cells = vec!["nj".to_string(), "nj".to_string()];

        let report = driver
            .rebuild_shard_detailed(RebuildRequest::new("ks", "-80").cells(cells))
            .await
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(topo.stats().locks_acquired, 1);
    }

    #[tokio::test]
    async fn test_per_shard_scope_takes_one_lock() {
        let topo = seeded().await;
        let driver = driver(&topo, RebuildConfig::new().lock_scope(LockScope::PerShard));

        let changed = driver
            .rebuild_shard("ks", "-80", &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(topo.stats().locks_acquired, 1);
        assert!(
            topo.get_endpoint_set("ny", "ks", "-80", TabletRole::Replica)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_names() {
        let topo = seeded().await;
        let driver = driver(&topo, RebuildConfig::default());
        let err = driver
            .rebuild_shard("", "-80", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TopoError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_rebuild_keyspace_aggregates_shards() {
        let topo = seeded().await;
        topo.fail_endpoint_writes_in_cell("ny");
        let driver = driver(&topo, RebuildConfig::default());

        let report = driver
            .rebuild_keyspace("ks", &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.shards.len(), 2);

        let Err(TopoError::Aggregate(failures)) = report.into_result() else {
            panic!("expected aggregate failure");
        };
        assert_eq!(
            failures.failed_cells(),
            vec!["ks/-80/ny".to_string(), "ks/80-/ny".to_string()]
        );
        assert_eq!(
            failures.succeeded,
            vec!["ks/-80/nj".to_string(), "ks/80-/nj".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rebuild_keyspace_continues_past_unreadable_shard() {
        let topo = seeded().await;
        topo.fail_shard_reads("ks", "-80");
        let driver = driver(&topo, RebuildConfig::default());

        let report = driver
            .rebuild_keyspace("ks", &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.shards.len(), 1);
        assert_eq!(report.shards[0].shard, "80-");
        assert!(report.shards[0].is_success());
        assert_eq!(report.failed_shards.len(), 1);
        assert_eq!(report.failed_shards[0].shard, "-80");
        assert!(matches!(
            report.failed_shards[0].source,
            TopoError::StoreRead(_)
        ));
        assert!(
            topo.get_endpoint_set("nj", "ks", "80-", TabletRole::Replica)
                .await
                .is_ok()
        );

        let Err(TopoError::Aggregate(failures)) = report.into_result() else {
            panic!("expected aggregate failure");
        };
        assert!(failures.failed.is_empty());
        assert_eq!(failures.failed_shards.len(), 1);
        assert!(!failures.all_lock_timeouts());
        assert_eq!(
            failures.succeeded,
            vec!["ks/80-/nj".to_string(), "ks/80-/ny".to_string()]
        );
    }
}
