use crate::core::{Result, Tablet};
use crate::topo::TopoServer;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reads the authoritative tablet membership of a shard.
///
/// Callers must hold the rebuild lock for the shard (or cell) they read; the lock orders this
/// read after every mutation that completed before acquisition.
#[derive(Clone)]
pub struct TabletDirectory {
    topo: Arc<dyn TopoServer>,
}

impl TabletDirectory {
    pub fn new(topo: Arc<dyn TopoServer>) -> Self {
        Self { topo }
    }

    /// Tablets of `keyspace/shard` in `cell`. Missing paths read as an empty set.
    pub async fn tablets_for_cell(
        &self,
        keyspace: &str,
        shard: &str,
        cell: &str,
    ) -> Result<Vec<Tablet>> {
        let tablets = match self.topo.get_tablets(keyspace, shard, cell).await {
            Ok(tablets) => tablets,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(tablets
            .into_iter()
            .filter(|tablet| tablet.alias.cell == cell && tablet.belongs_to(keyspace, shard))
            .collect())
    }

    /// Tablets of `keyspace/shard` for each of `cells`. Every requested cell has an entry.
    pub async fn tablets_for_shard(
        &self,
        keyspace: &str,
        shard: &str,
        cells: &[String],
    ) -> Result<BTreeMap<String, Vec<Tablet>>> {
        let mut by_cell = BTreeMap::new();
        for cell in cells {
            let tablets = self.tablets_for_cell(keyspace, shard, cell).await?;
            by_cell.insert(cell.clone(), tablets);
        }
        Ok(by_cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TabletAlias, TabletRole, TopoError};
    use crate::topo::MemoryTopoServer;

    async fn seeded() -> MemoryTopoServer {
        let topo = MemoryTopoServer::new();
        for (cell, uid, role) in [
            ("nj", 1, TabletRole::Master),
            ("nj", 2, TabletRole::Replica),
            ("ny", 3, TabletRole::Replica),
        ] {
            topo.create_tablet(&Tablet::new(
                TabletAlias::new(cell, uid),
                format!("host{}", uid),
                "ks",
                "0",
                role,
            ))
            .await
            .unwrap();
        }
        topo
    }

    #[tokio::test]
    async fn test_missing_cell_reads_as_empty() {
        let directory = TabletDirectory::new(Arc::new(seeded().await));
        assert!(directory.tablets_for_cell("ks", "0", "sf").await.unwrap().is_empty());
        assert!(directory.tablets_for_cell("ks", "80-", "nj").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tablets_for_shard_covers_every_cell() {
        let directory = TabletDirectory::new(Arc::new(seeded().await));
        let cells = vec!["nj".to_string(), "ny".to_string(), "sf".to_string()];
        let by_cell = directory.tablets_for_shard("ks", "0", &cells).await.unwrap();
        assert_eq!(by_cell["nj"].len(), 2);
        assert_eq!(by_cell["ny"].len(), 1);
        assert!(by_cell["sf"].is_empty());
    }

    #[tokio::test]
    async fn test_read_errors_propagate() {
        let topo = seeded().await;
        topo.fail_tablet_reads_in_cell("nj");
        let directory = TabletDirectory::new(Arc::new(topo));
        let err = directory.tablets_for_cell("ks", "0", "nj").await.unwrap_err();
        assert!(matches!(err, TopoError::StoreRead(_)));
    }
}
