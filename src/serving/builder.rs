use crate::core::{EndPoint, EndpointSet, Tablet, TabletRole};
use std::collections::BTreeMap;

/// Serving graph of one shard in one cell: role -> endpoints ordered by tablet uid.
///
/// Roles without serving tablets are absent, never present with an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellServingGraph {
    pub cell: String,
    pub keyspace: String,
    pub shard: String,
    pub roles: BTreeMap<TabletRole, Vec<EndPoint>>,
}

impl CellServingGraph {
    pub fn endpoints(&self, role: TabletRole) -> Option<&[EndPoint]> {
        self.roles.get(&role).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The records to publish, one per present role.
    pub fn endpoint_sets(&self) -> Vec<EndpointSet> {
        self.roles
            .iter()
            .map(|(role, entries)| EndpointSet {
                cell: self.cell.clone(),
                keyspace: self.keyspace.clone(),
                shard: self.shard.clone(),
                role: *role,
                entries: entries.clone(),
            })
            .collect()
    }
}

/// Partitions `tablets` by serving role for `cell`.
///
/// Tablets from other cells, other shards, or with non-serving roles are skipped. The result
/// does not depend on the order of `tablets`.
pub fn build_cell_serving_graph(
    cell: &str,
    keyspace: &str,
    shard: &str,
    tablets: &[Tablet],
) -> CellServingGraph {
    let mut by_role: BTreeMap<TabletRole, Vec<&Tablet>> = BTreeMap::new();
    for tablet in tablets {
        if tablet.alias.cell != cell || !tablet.belongs_to(keyspace, shard) {
            continue;
        }
        if !tablet.role.is_serving() {
            continue;
        }
        by_role.entry(tablet.role).or_default().push(tablet);
    }

    let roles = by_role
        .into_iter()
        .map(|(role, mut members)| {
            members.sort_by_key(|tablet| tablet.alias.uid);
            let entries = members.into_iter().map(EndPoint::from).collect();
            (role, entries)
        })
        .collect();

    CellServingGraph {
        cell: cell.to_string(),
        keyspace: keyspace.to_string(),
        shard: shard.to_string(),
        roles,
    }
}
