use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Where a single cell rebuild currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Idle,
    Locking,
    Reading,
    Computing,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Locking => "locking",
            Self::Reading => "reading",
            Self::Computing => "computing",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    keyspace: String,
    shard: String,
    cells: BTreeMap<String, RebuildPhase>,
}

/// Shared, cheaply cloned view of a running rebuild for operator tooling.
#[derive(Debug, Clone, Default)]
pub struct RebuildProgress {
    state: Arc<RwLock<ProgressState>>,
}

impl RebuildProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the tracker for a new rebuild of `keyspace/shard` over `cells`.
    pub fn start(&self, keyspace: &str, shard: &str, cells: &[String]) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.keyspace = keyspace.to_string();
        state.shard = shard.to_string();
        state.cells = cells
            .iter()
            .map(|cell| (cell.clone(), RebuildPhase::Idle))
            .collect();
    }

    pub fn set_phase(&self, cell: &str, phase: RebuildPhase) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.cells.insert(cell.to_string(), phase);
    }

    pub fn phase(&self, cell: &str) -> Option<RebuildPhase> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.cells.get(cell).copied()
    }

    /// True once every tracked cell reached `Done` or `Failed`.
    pub fn is_finished(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .cells
            .values()
            .all(|phase| matches!(phase, RebuildPhase::Done | RebuildPhase::Failed))
    }

    /// e.g. `rebuilding test_keyspace/0: nj=done, ny=publishing`
    pub fn status_text(&self) -> String {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.keyspace.is_empty() {
            return "no rebuild started".to_string();
        }
        let cells = state
            .cells
            .iter()
            .map(|(cell, phase)| format!("{}={}", cell, phase))
            .collect::<Vec<_>>();
        format!(
            "rebuilding {}/{}: {}",
            state.keyspace,
            state.shard,
            if cells.is_empty() {
                "no cells".to_string()
            } else {
                cells.join(", ")
            }
        )
    }
}
