/// Records held by [`MemoryTopoServer`].
#[derive(Debug, Default)]
struct MemoryTopoData {
    keyspaces: BTreeMap<String, Keyspace>,
    shards: BTreeMap<(String, String), Shard>,
    tablets: BTreeMap<TabletAlias, Tablet>,
    endpoint_sets: BTreeMap<EndpointSetKey, EndpointSet>,
    /// Cells registered explicitly, on top of those referenced by shards and tablets.
    extra_cells: BTreeSet<String>,
}

fn keyspace_path(keyspace: &str) -> String {
    format!("/global/keyspaces/{}", keyspace)
}

fn shard_path(keyspace: &str, shard: &str) -> String {
    format!("/global/keyspaces/{}/shards/{}", keyspace, shard)
}

fn tablet_path(alias: &TabletAlias) -> String {
    format!("/{}/tablets/{}", alias.cell, alias)
}

fn shard_cell_path(cell: &str, keyspace: &str, shard: &str) -> String {
    format!("/{}/replication/{}/{}", cell, keyspace, shard)
}

fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TopoError::InvalidArgument(format!(
            "{} name must not be empty",
            kind
        )));
    }
    if value.contains('/') {
        return Err(TopoError::InvalidArgument(format!(
            "{} name '{}' must not contain '/'",
            kind, value
        )));
    }
    Ok(())
}

impl MemoryTopoData {
    fn create_keyspace(&mut self, keyspace: &Keyspace) -> Result<()> {
        validate_name("keyspace", &keyspace.name)?;
        if self.keyspaces.contains_key(&keyspace.name) {
            return Err(TopoError::NodeExists(keyspace_path(&keyspace.name)));
        }
        self.keyspaces
            .insert(keyspace.name.clone(), keyspace.clone());
        Ok(())
    }

    fn create_shard(&mut self, shard: &Shard) -> Result<()> {
        validate_name("shard", &shard.name)?;
        if !self.keyspaces.contains_key(&shard.keyspace) {
            return Err(TopoError::NotFound(keyspace_path(&shard.keyspace)));
        }
        let key = (shard.keyspace.clone(), shard.name.clone());
        if self.shards.contains_key(&key) {
            return Err(TopoError::NodeExists(shard_path(&shard.keyspace, &shard.name)));
        }
        self.shards.insert(key, shard.clone());
        Ok(())
    }

    fn update_shard(&mut self, shard: &Shard) -> Result<()> {
        let key = (shard.keyspace.clone(), shard.name.clone());
        let Some(existing) = self.shards.get_mut(&key) else {
            return Err(TopoError::NotFound(shard_path(&shard.keyspace, &shard.name)));
        };
        *existing = shard.clone();
        Ok(())
    }

    fn create_tablet(&mut self, tablet: &Tablet) -> Result<()> {
        validate_name("cell", &tablet.alias.cell)?;
        if self.tablets.contains_key(&tablet.alias) {
            return Err(TopoError::NodeExists(tablet_path(&tablet.alias)));
        }
        self.tablets.insert(tablet.alias.clone(), tablet.clone());
        Ok(())
    }

    fn update_tablet(&mut self, tablet: &Tablet) -> Result<()> {
        let Some(existing) = self.tablets.get_mut(&tablet.alias) else {
            return Err(TopoError::NotFound(tablet_path(&tablet.alias)));
        };
        *existing = tablet.clone();
        Ok(())
    }

    fn tablets_in_cell(&self, keyspace: &str, shard: &str, cell: &str) -> Result<Vec<Tablet>> {
        let tablets = self
            .tablets
            .values()
            .filter(|tablet| tablet.alias.cell == cell && tablet.belongs_to(keyspace, shard))
            .cloned()
            .collect::<Vec<_>>();
        if tablets.is_empty() {
            return Err(TopoError::NotFound(shard_cell_path(cell, keyspace, shard)));
        }
        Ok(tablets)
    }

    fn known_cells(&self) -> Vec<String> {
        let mut cells = self.extra_cells.clone();
        for shard in self.shards.values() {
            cells.extend(shard.cells.iter().cloned());
        }
        for alias in self.tablets.keys() {
            cells.insert(alias.cell.clone());
        }
        cells.into_iter().collect()
    }

    fn endpoint_roles(&self, cell: &str, keyspace: &str, shard: &str) -> Vec<TabletRole> {
        self.endpoint_sets
            .keys()
            .filter(|key| key.cell == cell && key.keyspace == keyspace && key.shard == shard)
            .map(|key| key.role)
            .collect()
    }
}
