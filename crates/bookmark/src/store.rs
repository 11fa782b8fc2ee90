//! Storage backend trait for persisted sync state.

use async_trait::async_trait;

use crate::state::SyncState;

/// Backend for loading and persisting [`SyncState`].
///
/// Implementations must make `persist` atomic: a crash mid-write must
/// leave either the previous state or the new state readable, never a
/// truncated file. Extraction relies on this to resume from the last
/// durable bookmark after a failure.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted state, or `None` when none has been written yet.
    async fn load(&self) -> anyhow::Result<Option<SyncState>>;

    /// Durably persist the given state, replacing any previous one.
    async fn persist(&self, state: &SyncState) -> anyhow::Result<()>;
}
