#[async_trait]
impl TopoServer for MemoryTopoServer {
    async fn create_keyspace(&self, keyspace: &Keyspace) -> Result<()> {
        self.data.write().await.create_keyspace(keyspace)
    }

    async fn get_keyspace(&self, keyspace: &str) -> Result<Keyspace> {
        let data = self.data.read().await;
        data.keyspaces
            .get(keyspace)
            .cloned()
            .ok_or_else(|| TopoError::NotFound(keyspace_path(keyspace)))
    }

    async fn get_keyspace_names(&self) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data.keyspaces.keys().cloned().collect())
    }

    async fn create_shard(&self, shard: &Shard) -> Result<()> {
        self.data.write().await.create_shard(shard)
    }

    async fn update_shard(&self, shard: &Shard) -> Result<()> {
        self.data.write().await.update_shard(shard)
    }

    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<Shard> {
        self.check_shard_read(keyspace, shard)?;
        let data = self.data.read().await;
        data.shards
            .get(&(keyspace.to_string(), shard.to_string()))
            .cloned()
            .ok_or_else(|| TopoError::NotFound(shard_path(keyspace, shard)))
    }

    async fn get_shard_names(&self, keyspace: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        if !data.keyspaces.contains_key(keyspace) {
            return Err(TopoError::NotFound(keyspace_path(keyspace)));
        }
        Ok(data
            .shards
            .values()
            .filter(|shard| shard.keyspace == keyspace)
            .map(|shard| shard.name.clone())
            .collect())
    }

    async fn create_tablet(&self, tablet: &Tablet) -> Result<()> {
        self.data.write().await.create_tablet(tablet)
    }

    async fn update_tablet(&self, tablet: &Tablet) -> Result<()> {
        self.data.write().await.update_tablet(tablet)
    }

    async fn get_tablet(&self, alias: &TabletAlias) -> Result<Tablet> {
        let data = self.data.read().await;
        data.tablets
            .get(alias)
            .cloned()
            .ok_or_else(|| TopoError::NotFound(tablet_path(alias)))
    }

    async fn get_tablets(&self, keyspace: &str, shard: &str, cell: &str) -> Result<Vec<Tablet>> {
        self.check_tablet_read(cell, keyspace, shard)?;
        let data = self.data.read().await;
        data.tablets_in_cell(keyspace, shard, cell)
    }

    async fn get_known_cells(&self) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data.known_cells())
    }

    async fn get_endpoint_set(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        role: TabletRole,
    ) -> Result<EndpointSet> {
        let key = EndpointSetKey::new(cell, keyspace, shard, role);
        let data = self.data.read().await;
        data.endpoint_sets
            .get(&key)
            .cloned()
            .ok_or_else(|| TopoError::NotFound(key.path()))
    }

    async fn set_endpoint_set(&self, endpoints: &EndpointSet) -> Result<()> {
        let key = endpoints.key();
        self.check_endpoint_write(&key)?;
        let mut data = self.data.write().await;
        data.endpoint_sets.insert(key, endpoints.clone());
        self.counters.endpoint_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_endpoint_set(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
        role: TabletRole,
    ) -> Result<bool> {
        let key = EndpointSetKey::new(cell, keyspace, shard, role);
        self.check_endpoint_write(&key)?;
        let mut data = self.data.write().await;
        let removed = data.endpoint_sets.remove(&key).is_some();
        if removed {
            self.counters.endpoint_deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn get_endpoint_set_roles(
        &self,
        cell: &str,
        keyspace: &str,
        shard: &str,
    ) -> Result<Vec<TabletRole>> {
        let data = self.data.read().await;
        Ok(data.endpoint_roles(cell, keyspace, shard))
    }

    async fn lock_shard(
        &self,
        key: &ShardLockKey,
        timeout: Duration,
        action: &str,
    ) -> Result<LockHandle> {
        self.acquire_lock(key, timeout, action).await
    }

    async fn unlock_shard(&self, handle: LockHandle) -> Result<()> {
        self.release_lock(handle)
    }
}
