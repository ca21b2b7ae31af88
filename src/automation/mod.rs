//! Rebuild steps exposed as automation tasks.
//!
//! A cluster-operation scheduler runs tasks by name with string parameters. Tasks may emit
//! follow-up tasks, which the scheduler inserts directly after the emitting task.

mod tasks;

pub use tasks::{RebuildKeyspaceTask, RebuildShardTask};

use crate::core::{Result, TopoError};
use crate::rebuild::RebuildDriver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A task invocation: name plus parameters, as stored by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContainer {
    pub name: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl TaskContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Tasks to run right after this one.
    pub new_tasks: Vec<TaskContainer>,
    /// Free-form text for logs or an operator UI. May be empty.
    pub output: String,
}

#[async_trait]
pub trait Task: Send + Sync {
    /// Parameter keys that must be present for `run`.
    fn required_parameters(&self) -> &'static [&'static str];

    async fn run(&self, parameters: &HashMap<String, String>) -> Result<TaskOutput>;
}

/// Names accepted by [`task_for_name`].
pub const TASK_NAMES: &[&str] = &["RebuildShard", "RebuildKeyspace"];

/// Static name -> task mapping. Names match case-insensitively.
pub fn task_for_name(name: &str, driver: RebuildDriver) -> Option<Box<dyn Task>> {
    match name.to_ascii_lowercase().as_str() {
        "rebuildshard" => Some(Box::new(RebuildShardTask::new(driver))),
        "rebuildkeyspace" => Some(Box::new(RebuildKeyspaceTask::new(driver))),
        _ => None,
    }
}

/// Fails with every missing key named, in declaration order.
pub fn check_required_parameters(
    task: &dyn Task,
    parameters: &HashMap<String, String>,
) -> Result<()> {
    let missing = task
        .required_parameters()
        .iter()
        .filter(|key| {
            parameters
                .get(**key)
                .is_none_or(|value| value.trim().is_empty())
        })
        .copied()
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return Ok(());
    }
    Err(TopoError::InvalidArgument(format!(
        "missing required parameter(s): {}",
        missing.join(", ")
    )))
}

/// Runs the named task after validating its parameters.
pub async fn run_task(
    container: &TaskContainer,
    driver: RebuildDriver,
) -> Result<TaskOutput> {
    let task = task_for_name(&container.name, driver).ok_or_else(|| {
        TopoError::InvalidArgument(format!(
            "unknown task '{}' (known: {})",
            container.name,
            TASK_NAMES.join(", ")
        ))
    })?;
    check_required_parameters(task.as_ref(), &container.parameters)?;
    task.run(&container.parameters).await
}
