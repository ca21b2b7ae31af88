pub mod error;
pub mod topology;

pub use error::{CellRebuildError, RebuildFailures, Result, ShardRebuildError, TopoError};
pub use topology::{
    EndPoint, EndpointSet, EndpointSetKey, KeyRange, Keyspace, Shard, Tablet, TabletAlias,
    TabletRole,
};
