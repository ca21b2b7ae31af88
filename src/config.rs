use crate::core::{Result, TopoError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_LOCK_TIMEOUT_MS: &str = "SHARDGRAPH_LOCK_TIMEOUT_MS";
pub const ENV_LOCK_SCOPE: &str = "SHARDGRAPH_LOCK_SCOPE";
pub const ENV_CELL_CONCURRENCY: &str = "SHARDGRAPH_CELL_CONCURRENCY";

/// Granularity of the rebuild lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScope {
    /// One lock per (keyspace, shard, cell); cells rebuild concurrently.
    #[default]
    PerCell,
    /// One lock per (keyspace, shard); all requested cells rebuild serially under it.
    PerShard,
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerCell => f.write_str("per-cell"),
            Self::PerShard => f.write_str("per-shard"),
        }
    }
}

impl FromStr for LockScope {
    type Err = TopoError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "per-cell" | "cell" => Ok(Self::PerCell),
            "per-shard" | "shard" => Ok(Self::PerShard),
            other => Err(TopoError::InvalidArgument(format!(
                "lock scope must be one of: per-cell, per-shard (got '{}')",
                other
            ))),
        }
    }
}

/// Rebuild configuration
#[derive(Debug, Clone)]
pub struct RebuildConfig {
    /// Default wait for the rebuild lock when a caller does not pass one
    pub lock_timeout: Duration,

    /// Lock granularity
    pub lock_scope: LockScope,

    /// Maximum cells rebuilt at once under `LockScope::PerCell`
    pub cell_concurrency: usize,

    /// Recorded on every lock handle taken by the engine
    pub action_name: String,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            lock_scope: LockScope::PerCell,
            cell_concurrency: 4,
            action_name: "RebuildShard".to_string(),
        }
    }
}

impl RebuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the lock scope
    pub fn lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }

    /// Set per-cell concurrency
    pub fn cell_concurrency(mut self, concurrency: usize) -> Self {
        self.cell_concurrency = concurrency;
        self
    }

    /// Set the action name recorded on locks
    pub fn action_name(mut self, name: &str) -> Self {
        self.action_name = name.to_string();
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.lock_timeout.is_zero() {
            return Err("lock_timeout must be greater than zero".to_string());
        }
        if self.cell_concurrency == 0 {
            return Err("cell_concurrency must be >= 1".to_string());
        }
        if self.action_name.trim().is_empty() {
            return Err("action_name must not be empty".to_string());
        }
        Ok(())
    }

    /// Reads overrides from `SHARDGRAPH_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RebuildConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|_| {
                TopoError::InvalidArgument(format!(
                    "{} must be a number of milliseconds (got '{}')",
                    ENV_LOCK_TIMEOUT_MS, raw
                ))
            })?;
            config.lock_timeout = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup(ENV_LOCK_SCOPE) {
            config.lock_scope = raw.parse()?;
        }

        if let Some(raw) = lookup(ENV_CELL_CONCURRENCY) {
            config.cell_concurrency = raw.trim().parse::<usize>().map_err(|_| {
                TopoError::InvalidArgument(format!(
                    "{} must be a positive integer (got '{}')",
                    ENV_CELL_CONCURRENCY, raw
                ))
            })?;
        }

        config.validate().map_err(TopoError::InvalidArgument)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RebuildConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert_eq!(config.lock_scope, LockScope::PerCell);
        assert_eq!(config.cell_concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validate() {
        let config = RebuildConfig::new()
            .lock_timeout(Duration::from_millis(250))
            .lock_scope(LockScope::PerShard)
            .cell_concurrency(0);
        assert!(config.validate().is_err());
        assert!(config.cell_concurrency(2).validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let vars = HashMap::from([
            (ENV_LOCK_TIMEOUT_MS, "1500"),
            (ENV_LOCK_SCOPE, "per-shard"),
            (ENV_CELL_CONCURRENCY, "8"),
        ]);
        let config = RebuildConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(1500));
        assert_eq!(config.lock_scope, LockScope::PerShard);
        assert_eq!(config.cell_concurrency, 8);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let bad_scope = RebuildConfig::from_lookup(|key| {
            (key == ENV_LOCK_SCOPE).then(|| "global".to_string())
        });
        assert!(matches!(bad_scope, Err(TopoError::InvalidArgument(_))));

        let zero_timeout = RebuildConfig::from_lookup(|key| {
            (key == ENV_LOCK_TIMEOUT_MS).then(|| "0".to_string())
        });
        assert!(zero_timeout.is_err());
    }
}
