//! In-memory state storage for tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::state::SyncState;
use crate::store::StateStore;

/// In-memory implementation of the StateStore trait.
///
/// Holds the last persisted state behind a mutex. Nothing survives the
/// process; useful for tests and for runs where no state path is given.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Option<SyncState>>,
}

impl MemoryStore {
    /// Create an empty MemoryStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the last persisted state, if any.
    pub fn current(&self) -> Option<SyncState> {
        self.state.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<SyncState>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("state lock poisoned"))?;
        Ok(guard.clone())
    }

    async fn persist(&self, state: &SyncState) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("state lock poisoned"))?;
        *guard = Some(state.clone());
        Ok(())
    }
}
