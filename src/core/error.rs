use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TopoError {
    #[error("node doesn't exist: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("timed out after {timeout:?} waiting for lock {key}")]
    LockTimeout { key: String, timeout: Duration },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("topology read failed: {0}")]
    StoreRead(String),

    #[error("topology write failed: {0}")]
    StoreWrite(String),

    #[error("cell '{cell}' is not listed for shard {keyspace}/{shard}")]
    UnknownCell {
        keyspace: String,
        shard: String,
        cell: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Aggregate(RebuildFailures),
}

pub type Result<T> = std::result::Result<T, TopoError>;

impl TopoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for TopoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for TopoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TopoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A single cell that could not be rebuilt, with the shard it belonged to.
#[derive(Error, Debug, Clone)]
#[error("rebuild of {keyspace}/{shard} in cell {cell} failed: {source}")]
pub struct CellRebuildError {
    pub keyspace: String,
    pub shard: String,
    pub cell: String,
    #[source]
    pub source: TopoError,
}

impl CellRebuildError {
    pub fn new(
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        cell: impl Into<String>,
        source: TopoError,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            cell: cell.into(),
            source,
        }
    }
}

/// A shard of a keyspace rebuild that failed before any of its cells were attempted.
#[derive(Error, Debug, Clone)]
#[error("rebuild of {keyspace}/{shard} could not start: {source}")]
pub struct ShardRebuildError {
    pub keyspace: String,
    pub shard: String,
    #[source]
    pub source: TopoError,
}

/// Summary of a multi-cell (or multi-shard) rebuild where at least one cell or shard failed.
///
/// Cells listed in `succeeded` have been published and stay published.
#[derive(Debug, Clone, Default)]
pub struct RebuildFailures {
    pub succeeded: Vec<String>,
    pub failed: Vec<CellRebuildError>,
    pub failed_shards: Vec<ShardRebuildError>,
}

impl RebuildFailures {
    /// Names of the failed cells, qualified as `keyspace/shard/cell`.
    pub fn failed_cells(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|failure| format!("{}/{}/{}", failure.keyspace, failure.shard, failure.cell))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.failed_shards.is_empty()
    }

    /// True when every failure is a lock acquisition timeout.
    pub fn all_lock_timeouts(&self) -> bool {
        !self.failed.is_empty()
            && self.failed_shards.is_empty()
            && self.failed.iter().all(|f| f.source.is_lock_timeout())
    }
}

impl fmt::Display for RebuildFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rebuild failed in {} cell(s) ({} succeeded): ",
            self.failed.len(),
            self.succeeded.len()
        )?;
        if !self.failed_shards.is_empty() {
            write!(f, "{} shard(s) not started: ", self.failed_shards.len())?;
        }
        let details = self
            .failed_shards
            .iter()
            .map(|failure| failure.to_string())
            .chain(self.failed.iter().map(|failure| failure.to_string()))
            .collect::<Vec<_>>();
        write!(f, "{}", details.join("; "))
    }
}
