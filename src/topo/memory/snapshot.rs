/// Serializable image of a whole topology, used for `topo-tool` state files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub cells: Vec<String>,
    #[serde(default)]
    pub keyspaces: Vec<Keyspace>,
    #[serde(default)]
    pub shards: Vec<Shard>,
    #[serde(default)]
    pub tablets: Vec<Tablet>,
    #[serde(default)]
    pub endpoint_sets: Vec<EndpointSet>,
}

impl MemoryTopoServer {
    /// Builds a store from a snapshot. Shards must reference known keyspaces.
    pub fn from_snapshot(snapshot: TopologySnapshot) -> Result<Self> {
        let mut data = MemoryTopoData::default();
        data.extra_cells.extend(snapshot.cells);
        for keyspace in &snapshot.keyspaces {
            data.create_keyspace(keyspace)?;
        }
        for shard in &snapshot.shards {
            data.create_shard(shard)?;
        }
        for tablet in &snapshot.tablets {
            data.create_tablet(tablet)?;
        }
        for endpoints in snapshot.endpoint_sets {
            data.endpoint_sets.insert(endpoints.key(), endpoints);
        }
        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            ..Self::default()
        })
    }

    pub async fn snapshot(&self) -> TopologySnapshot {
        let data = self.data.read().await;
        TopologySnapshot {
            cells: data.extra_cells.iter().cloned().collect(),
            keyspaces: data.keyspaces.values().cloned().collect(),
            shards: data.shards.values().cloned().collect(),
            tablets: data.tablets.values().cloned().collect(),
            endpoint_sets: data.endpoint_sets.values().cloned().collect(),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let snapshot: TopologySnapshot = serde_json::from_slice(&bytes)?;
        Self::from_snapshot(snapshot)
    }

    /// Writes the snapshot atomically: temp file in the same directory, then rename.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let serialized = serde_json::to_vec_pretty(&self.snapshot().await)?;

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;

        // tempfile is blocking I/O; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut temp_file = tempfile::NamedTempFile::new_in(&parent)?;
            temp_file.write_all(&serialized)?;
            temp_file.as_file().sync_all()?;
            temp_file.persist(&path).map_err(|err| {
                TopoError::Io(format!("failed to persist {}: {}", path.display(), err))
            })?;
            Ok(())
        })
        .await
        .map_err(|err| TopoError::Io(format!("snapshot writer task failed: {}", err)))?
    }
}
