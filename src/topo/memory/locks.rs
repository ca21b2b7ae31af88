/// Locks are hierarchical per shard: a cell lock holds the shard gate shared plus its own
/// mutex, a shard lock holds the gate exclusively. A shard lock therefore waits for every cell
/// lock of that shard and blocks new ones, whatever scope each caller uses.
enum HeldLock {
    Cell {
        _cell: OwnedMutexGuard<()>,
        _gate: OwnedRwLockReadGuard<()>,
    },
    Shard {
        _gate: OwnedRwLockWriteGuard<()>,
    },
}

/// Per-shard gates, per-cell mutexes, and the guards held for outstanding `LockHandle`s.
#[derive(Default)]
struct MemoryLockTable {
    gates: HashMap<(String, String), Arc<RwLock<()>>>,
    mutexes: HashMap<ShardLockKey, Arc<Mutex<()>>>,
    held: HashMap<Uuid, (ShardLockKey, HeldLock)>,
}

fn gate_key(key: &ShardLockKey) -> (String, String) {
    (key.keyspace.clone(), key.shard.clone())
}

impl MemoryLockTable {
    /// Forgets the gate and mutex of `key` once nobody holds or waits on them.
    fn prune(&mut self, key: &ShardLockKey) {
        if self
            .mutexes
            .get(key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            self.mutexes.remove(key);
        }
        let gate = gate_key(key);
        if self
            .gates
            .get(&gate)
            .is_some_and(|rwlock| Arc::strong_count(rwlock) == 1)
        {
            self.gates.remove(&gate);
        }
    }
}

impl MemoryTopoServer {
    fn lock_primitives(
        &self,
        key: &ShardLockKey,
    ) -> Result<(Arc<RwLock<()>>, Option<Arc<Mutex<()>>>)> {
        let mut table = self.locks.lock()?;
        let gate = table
            .gates
            .entry(gate_key(key))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone();
        let mutex = key.cell.as_ref().map(|_| {
            table
                .mutexes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        });
        Ok((gate, mutex))
    }

    async fn acquire_lock(
        &self,
        key: &ShardLockKey,
        timeout: Duration,
        action: &str,
    ) -> Result<LockHandle> {
        let (gate, mutex) = self.lock_primitives(key)?;
        let acquire = async move {
            match mutex {
                Some(mutex) => {
                    let gate = gate.read_owned().await;
                    let cell = mutex.lock_owned().await;
                    HeldLock::Cell {
                        _cell: cell,
                        _gate: gate,
                    }
                }
                None => HeldLock::Shard {
                    _gate: gate.write_owned().await,
                },
            }
        };
        let acquired = tokio::time::timeout(timeout, acquire).await;
        let held = match acquired {
            Ok(held) => held,
            Err(_) => {
                self.locks.lock()?.prune(key);
                return Err(TopoError::LockTimeout {
                    key: key.to_string(),
                    timeout,
                });
            }
        };

        let handle = LockHandle::new(key.clone(), action);
        self.locks
            .lock()?
            .held
            .insert(handle.id, (key.clone(), held));
        self.counters.locks_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn release_lock(&self, handle: LockHandle) -> Result<()> {
        if self.faults.lock()?.fail_unlocks {
            return Err(TopoError::LockError(format!(
                "injected unlock failure for {}",
                handle.key
            )));
        }
        let released = {
            let mut table = self.locks.lock()?;
            match table.held.get(&handle.id) {
                Some((key, _)) if *key == handle.key => table.held.remove(&handle.id),
                _ => None,
            }
        };
        // Dropping the guards is what wakes the next waiter.
        let Some((key, held)) = released else {
            return Err(TopoError::LockError(format!(
                "lock {} on {} is not held",
                handle.id, handle.key
            )));
        };
        drop(held);
        self.locks.lock()?.prune(&key);
        self.counters.locks_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// True while some handle holds `key`.
    pub fn is_locked(&self, key: &ShardLockKey) -> bool {
        let Ok(table) = self.locks.lock() else {
            return false;
        };
        table.held.values().any(|(held, _)| held == key)
    }
}
