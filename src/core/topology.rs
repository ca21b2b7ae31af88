use super::error::{Result, TopoError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Globally unique tablet identity: the cell it lives in plus a numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabletAlias {
    pub cell: String,
    pub uid: u32,
}

impl TabletAlias {
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }
}

impl fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}

/// Serving function of a tablet.
///
/// Declaration order is the display order used in reports and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletRole {
    #[serde(alias = "primary")]
    Master,
    Replica,
    #[serde(alias = "batch")]
    Rdonly,
    Spare,
    Backup,
    Experimental,
    Restore,
    Drained,
    Scrap,
}

impl TabletRole {
    pub const ALL: [TabletRole; 9] = [
        TabletRole::Master,
        TabletRole::Replica,
        TabletRole::Rdonly,
        TabletRole::Spare,
        TabletRole::Backup,
        TabletRole::Experimental,
        TabletRole::Restore,
        TabletRole::Drained,
        TabletRole::Scrap,
    ];

    /// Roles that routers may send traffic to and that therefore appear in the serving graph.
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Master | Self::Replica | Self::Rdonly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "replica",
            Self::Rdonly => "rdonly",
            Self::Spare => "spare",
            Self::Backup => "backup",
            Self::Experimental => "experimental",
            Self::Restore => "restore",
            Self::Drained => "drained",
            Self::Scrap => "scrap",
        }
    }
}

impl fmt::Display for TabletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TabletRole {
    type Err = TopoError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "master" | "primary" => Ok(Self::Master),
            "replica" => Ok(Self::Replica),
            "rdonly" | "batch" => Ok(Self::Rdonly),
            "spare" => Ok(Self::Spare),
            "backup" => Ok(Self::Backup),
            "experimental" => Ok(Self::Experimental),
            "restore" => Ok(Self::Restore),
            "drained" => Ok(Self::Drained),
            "scrap" => Ok(Self::Scrap),
            other => Err(TopoError::InvalidArgument(format!(
                "unknown tablet role '{}'",
                other
            ))),
        }
    }
}

/// One database server instance as recorded in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub alias: TabletAlias,
    pub hostname: String,
    #[serde(default)]
    pub ip_addr: String,
    #[serde(default)]
    pub port_map: BTreeMap<String, u16>,
    pub keyspace: String,
    pub shard: String,
    pub role: TabletRole,
}

impl Tablet {
    pub fn new(
        alias: TabletAlias,
        hostname: impl Into<String>,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        role: TabletRole,
    ) -> Self {
        Self {
            alias,
            hostname: hostname.into(),
            ip_addr: String::new(),
            port_map: BTreeMap::new(),
            keyspace: keyspace.into(),
            shard: shard.into(),
            role,
        }
    }

    pub fn with_ip_addr(mut self, ip_addr: impl Into<String>) -> Self {
        self.ip_addr = ip_addr.into();
        self
    }

    pub fn with_port(mut self, name: impl Into<String>, port: u16) -> Self {
        self.port_map.insert(name.into(), port);
        self
    }

    pub fn belongs_to(&self, keyspace: &str, shard: &str) -> bool {
        self.keyspace == keyspace && self.shard == shard
    }
}

/// Hex-encoded keyspace-id range owned by a shard. Empty bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl KeyRange {
    /// Parses shard names like `-80`, `80-` and `40-80`.
    ///
    /// Names without a dash (e.g. `0`) cover the whole keyspace.
    pub fn from_shard_name(name: &str) -> Result<Self> {
        let Some((start, end)) = name.split_once('-') else {
            return Ok(Self::default());
        };
        for bound in [start, end] {
            if !bound.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(TopoError::InvalidArgument(format!(
                    "shard name '{}' is not a valid key range",
                    name
                )));
            }
        }
        let start = start.to_ascii_lowercase();
        let end = end.to_ascii_lowercase();
        if !start.is_empty() && !end.is_empty() && start >= end {
            return Err(TopoError::InvalidArgument(format!(
                "shard name '{}' has start >= end",
                name
            )));
        }
        Ok(Self { start, end })
    }

    pub fn is_full(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyspace {
    pub name: String,
    #[serde(default)]
    pub sharding_column_name: Option<String>,
}

impl Keyspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sharding_column_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub keyspace: String,
    pub name: String,
    /// Cells allowed to serve this shard, in the order they were added.
    #[serde(default)]
    pub cells: Vec<String>,
    #[serde(default)]
    pub key_range: KeyRange,
}

impl Shard {
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let key_range = KeyRange::from_shard_name(&name)?;
        Ok(Self {
            keyspace: keyspace.into(),
            name,
            cells: Vec::new(),
            key_range,
        })
    }

    pub fn has_cell(&self, cell: &str) -> bool {
        self.cells.iter().any(|c| c == cell)
    }

    /// Adds `cell` to the serving cells unless already present.
    pub fn add_cell(&mut self, cell: impl Into<String>) {
        let cell = cell.into();
        if !self.has_cell(&cell) {
            self.cells.push(cell);
        }
    }
}

/// Reachable address of one serving tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndPoint {
    pub alias: TabletAlias,
    pub host: String,
    #[serde(default)]
    pub port_map: BTreeMap<String, u16>,
}

impl From<&Tablet> for EndPoint {
    fn from(tablet: &Tablet) -> Self {
        Self {
            alias: tablet.alias.clone(),
            host: tablet.hostname.clone(),
            port_map: tablet.port_map.clone(),
        }
    }
}

/// Address of an `EndpointSet` in the serving graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointSetKey {
    pub cell: String,
    pub keyspace: String,
    pub shard: String,
    pub role: TabletRole,
}

impl EndpointSetKey {
    pub fn new(
        cell: impl Into<String>,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        role: TabletRole,
    ) -> Self {
        Self {
            cell: cell.into(),
            keyspace: keyspace.into(),
            shard: shard.into(),
            role,
        }
    }

    /// Store path of the record.
    pub fn path(&self) -> String {
        format!(
            "/{}/serving/{}/{}/{}",
            self.cell, self.keyspace, self.shard, self.role
        )
    }
}

/// Derived list of endpoints serving one role of one shard in one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSet {
    pub cell: String,
    pub keyspace: String,
    pub shard: String,
    pub role: TabletRole,
    pub entries: Vec<EndPoint>,
}

impl EndpointSet {
    pub fn key(&self) -> EndpointSetKey {
        EndpointSetKey::new(
            self.cell.clone(),
            self.keyspace.clone(),
            self.shard.clone(),
            self.role,
        )
    }
}
