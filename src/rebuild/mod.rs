//! Serving-graph rebuild: directory reader, per-cell engine and multi-cell driver.

mod driver;
mod engine;
mod hook;
mod lock;
mod progress;
mod reader;

pub use driver::{KeyspaceRebuildReport, RebuildDriver, RebuildRequest, ShardRebuildReport};
pub use engine::{CellRebuildOutcome, RebuildEngine};
pub use hook::{LockHook, NoopLockHook};
pub use lock::ShardLockGuard;
pub use progress::{RebuildPhase, RebuildProgress};
pub use reader::TabletDirectory;
