use super::{Task, TaskContainer, TaskOutput};
use crate::core::{Result, TopoError};
use crate::rebuild::{RebuildDriver, RebuildProgress, RebuildRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{Level, event};

const KEYSPACE: &str = "keyspace";
const SHARD: &str = "shard";
const CELLS: &str = "cells";
const LOCK_TIMEOUT_MS: &str = "lock_timeout_ms";

fn required<'a>(parameters: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    parameters
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TopoError::InvalidArgument(format!("missing required parameter: {}", key)))
}

/// `cells` is a comma separated list; blanks are dropped.
fn parse_cells(parameters: &HashMap<String, String>) -> Vec<String> {
    parameters
        .get(CELLS)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|cell| !cell.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_lock_timeout(parameters: &HashMap<String, String>) -> Result<Option<Duration>> {
    let Some(raw) = parameters.get(LOCK_TIMEOUT_MS) else {
        return Ok(None);
    };
    let millis = raw.trim().parse::<u64>().map_err(|_| {
        TopoError::InvalidArgument(format!("{} must be an integer, got '{}'", LOCK_TIMEOUT_MS, raw))
    })?;
    if millis == 0 {
        return Err(TopoError::InvalidArgument(format!(
            "{} must be greater than zero",
            LOCK_TIMEOUT_MS
        )));
    }
    Ok(Some(Duration::from_millis(millis)))
}

/// Rebuilds the serving graph of one shard.
pub struct RebuildShardTask {
    driver: RebuildDriver,
}

impl RebuildShardTask {
    pub fn new(driver: RebuildDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Task for RebuildShardTask {
    fn required_parameters(&self) -> &'static [&'static str] {
        &[KEYSPACE, SHARD]
    }

    async fn run(&self, parameters: &HashMap<String, String>) -> Result<TaskOutput> {
        let keyspace = required(parameters, KEYSPACE)?;
        let shard = required(parameters, SHARD)?;
        let progress = RebuildProgress::new();

        let mut request = RebuildRequest::new(keyspace, shard)
            .cells(parse_cells(parameters))
            .progress(progress.clone());
        if let Some(timeout) = parse_lock_timeout(parameters)? {
            request = request.lock_timeout(timeout);
        }

        let changed = self
            .driver
            .rebuild_shard_detailed(request)
            .await?
            .into_result()?;
        event!(Level::DEBUG, keyspace, shard, changed, "RebuildShard task done");

        Ok(TaskOutput {
            new_tasks: Vec::new(),
            output: format!("{}\nchanged={}", progress.status_text(), changed),
        })
    }
}

/// Expands into one `RebuildShard` task per shard of the keyspace.
pub struct RebuildKeyspaceTask {
    driver: RebuildDriver,
}

impl RebuildKeyspaceTask {
    pub fn new(driver: RebuildDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Task for RebuildKeyspaceTask {
    fn required_parameters(&self) -> &'static [&'static str] {
        &[KEYSPACE]
    }

    async fn run(&self, parameters: &HashMap<String, String>) -> Result<TaskOutput> {
        let keyspace = required(parameters, KEYSPACE)?;
        let shards = self.driver.engine().topo().get_shard_names(keyspace).await?;

        let new_tasks = shards
            .iter()
            .map(|shard| {
                let mut container = TaskContainer::new("RebuildShard")
                    .parameter(KEYSPACE, keyspace)
                    .parameter(SHARD, shard.as_str());
                for key in [CELLS, LOCK_TIMEOUT_MS] {
                    if let Some(value) = parameters.get(key) {
                        container = container.parameter(key, value.as_str());
                    }
                }
                container
            })
            .collect::<Vec<_>>();

        Ok(TaskOutput {
            output: format!("scheduled {} shard rebuild(s) for {}", new_tasks.len(), keyspace),
            new_tasks,
        })
    }
}
