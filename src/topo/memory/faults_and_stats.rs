/// Failures injected into specific cells, for exercising partial-failure paths.
#[derive(Debug, Default)]
struct MemoryTopoFaults {
    endpoint_write_cells: BTreeSet<String>,
    endpoint_write_roles: BTreeSet<(String, TabletRole)>,
    tablet_read_cells: BTreeSet<String>,
    shard_reads: BTreeSet<(String, String)>,
    fail_unlocks: bool,
}

#[derive(Debug, Default)]
struct MemoryTopoCounters {
    endpoint_writes: AtomicU64,
    endpoint_deletes: AtomicU64,
    locks_acquired: AtomicU64,
    locks_released: AtomicU64,
}

/// Operation counters of a [`MemoryTopoServer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTopoStats {
    pub endpoint_writes: u64,
    pub endpoint_deletes: u64,
    pub locks_acquired: u64,
    pub locks_released: u64,
}

impl MemoryTopoServer {
    /// Makes every endpoint-set write or delete in `cell` fail with `StoreWrite`.
    pub fn fail_endpoint_writes_in_cell(&self, cell: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.endpoint_write_cells.insert(cell.into());
        }
    }

    /// Makes endpoint-set writes for `role` in `cell` fail with `StoreWrite`.
    pub fn fail_endpoint_writes_for_role(&self, cell: impl Into<String>, role: TabletRole) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.endpoint_write_roles.insert((cell.into(), role));
        }
    }

    /// Makes reads of the `keyspace/shard` record fail with `StoreRead`.
    pub fn fail_shard_reads(&self, keyspace: impl Into<String>, shard: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.shard_reads.insert((keyspace.into(), shard.into()));
        }
    }

    /// Makes every `unlock_shard` fail with `LockError`, leaving the lock held.
    pub fn fail_unlocks(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_unlocks = true;
        }
    }

    /// Makes every tablet listing in `cell` fail with `StoreRead`.
    pub fn fail_tablet_reads_in_cell(&self, cell: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.tablet_read_cells.insert(cell.into());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = MemoryTopoFaults::default();
        }
    }

    fn check_endpoint_write(&self, key: &EndpointSetKey) -> Result<()> {
        let faults = self.faults.lock()?;
        if faults.endpoint_write_cells.contains(&key.cell)
            || faults
                .endpoint_write_roles
                .contains(&(key.cell.clone(), key.role))
        {
            return Err(TopoError::StoreWrite(format!(
                "injected write failure for {}",
                key.path()
            )));
        }
        Ok(())
    }

    fn check_shard_read(&self, keyspace: &str, shard: &str) -> Result<()> {
        let faults = self.faults.lock()?;
        if faults
            .shard_reads
            .contains(&(keyspace.to_string(), shard.to_string()))
        {
            return Err(TopoError::StoreRead(format!(
                "injected read failure for {}",
                shard_path(keyspace, shard)
            )));
        }
        Ok(())
    }

    fn check_tablet_read(&self, cell: &str, keyspace: &str, shard: &str) -> Result<()> {
        let faults = self.faults.lock()?;
        if faults.tablet_read_cells.contains(cell) {
            return Err(TopoError::StoreRead(format!(
                "injected read failure for {}",
                shard_cell_path(cell, keyspace, shard)
            )));
        }
        Ok(())
    }

    pub fn stats(&self) -> MemoryTopoStats {
        MemoryTopoStats {
            endpoint_writes: self.counters.endpoint_writes.load(Ordering::SeqCst),
            endpoint_deletes: self.counters.endpoint_deletes.load(Ordering::SeqCst),
            locks_acquired: self.counters.locks_acquired.load(Ordering::SeqCst),
            locks_released: self.counters.locks_released.load(Ordering::SeqCst),
        }
    }
}
