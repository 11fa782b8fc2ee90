//! Record sink trait.

use async_trait::async_trait;

use bookmark::SyncState;

use crate::catalog::CollectionDescriptor;
use crate::values::Document;

/// Ordered consumer of extraction output.
///
/// The extraction loop announces each stream's schema once, then
/// interleaves records with state snapshots. A state write only ever
/// follows the records that justify it, so a consumer that checkpoints
/// on state writes replays at-least-once after a crash, never skipping
/// a record.
#[async_trait]
pub trait RecordSink: Send {
    /// Announce a stream and its schema before any of its records.
    async fn write_schema(&mut self, stream: &CollectionDescriptor) -> anyhow::Result<()>;

    /// Emit one coerced document for a stream.
    async fn write_record(&mut self, stream: &str, document: &Document) -> anyhow::Result<()>;

    /// Emit a state snapshot covering everything written so far.
    async fn write_state(&mut self, state: &SyncState) -> anyhow::Result<()>;
}
