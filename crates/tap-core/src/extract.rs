//! The incremental extraction loop.
//!
//! One stream extracts at a time: announce the schema, open a cursor
//! (bounded below by the stream's bookmark for incremental reads), pull
//! batches, emit records, advance the bookmark, and snapshot state at a
//! fixed record cadence. A final snapshot always closes the stream, on
//! cancellation as well as on completion, so an interrupted run resumes
//! exactly like a finished one.

use tokio_util::sync::CancellationToken;

use bookmark::{Bookmark, BookmarkError, BookmarkKind, BookmarkManager, StateStore};

use crate::catalog::{Catalog, CollectionDescriptor, ConfigError, ReplicationMethod};
use crate::sink::RecordSink;
use crate::source::{CollectionQuery, DocumentSource, SourceError};
use crate::values::{Document, PortableValue};

/// How documents without a usable replication key are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// A document without a usable key aborts its stream.
    #[default]
    Strict,
    /// A document without a usable key is skipped and counted.
    Resilient,
}

/// Tunables for the extraction loop.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Missing/unusable replication key handling.
    pub key_policy: KeyPolicy,
    /// Documents requested per cursor batch.
    pub batch_size: u32,
    /// Emitted records between state snapshots.
    pub state_interval: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            key_policy: KeyPolicy::Strict,
            batch_size: 1000,
            state_interval: 1000,
        }
    }
}

/// Error aborting one stream's extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The stream's configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A document lacked the replication key under strict policy.
    #[error("stream '{stream}': document missing replication key '{key}'")]
    MissingReplicationKey {
        /// Stream being extracted.
        stream: String,
        /// Declared replication key.
        key: String,
    },

    /// The replication key held a value with no bookmark ordering.
    #[error("stream '{stream}': replication key '{key}' is not an orderable scalar")]
    UnorderableKey {
        /// Stream being extracted.
        stream: String,
        /// Declared replication key.
        key: String,
    },

    /// The bookmark rejected a candidate value.
    #[error(transparent)]
    Bookmark(#[from] BookmarkError),

    /// The source failed while listing, sampling or reading.
    #[error("stream '{stream}': reading from source failed")]
    Source {
        /// Stream being extracted.
        stream: String,
        /// Underlying source fault.
        #[source]
        cause: SourceError,
    },

    /// The sink refused a schema, record or state write.
    #[error("stream '{stream}': writing to sink failed")]
    Sink {
        /// Stream being extracted.
        stream: String,
        /// Underlying sink fault.
        #[source]
        cause: anyhow::Error,
    },

    /// The state store failed to persist a snapshot.
    #[error("stream '{stream}': persisting state failed")]
    State {
        /// Stream being extracted.
        stream: String,
        /// Underlying store fault.
        #[source]
        cause: anyhow::Error,
    },
}

/// Per-stream extraction outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    /// Stream name.
    pub stream: String,
    /// Records emitted to the sink.
    pub emitted: u64,
    /// Documents skipped under the resilient key policy.
    pub skipped: u64,
}

impl StreamReport {
    fn new(stream: &str) -> Self {
        Self {
            stream: stream.to_string(),
            emitted: 0,
            skipped: 0,
        }
    }
}

/// Outcome of a whole sync run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Streams that ran to completion (or clean cancellation).
    pub reports: Vec<StreamReport>,
    /// Streams that aborted, with their errors.
    pub aborted: Vec<(String, ExtractError)>,
}

impl SyncSummary {
    /// Whether every stream completed.
    pub fn all_ok(&self) -> bool {
        self.aborted.is_empty()
    }

    /// Total records emitted across streams.
    pub fn total_emitted(&self) -> u64 {
        self.reports.iter().map(|r| r.emitted).sum()
    }

    /// Total documents skipped across streams.
    pub fn total_skipped(&self) -> u64 {
        self.reports.iter().map(|r| r.skipped).sum()
    }
}

/// Reject catalogs that cannot extract under the given policy.
///
/// Under strict policy every selected INCREMENTAL stream must declare a
/// non-empty replication key. Runs before any extraction so the
/// rejection never follows partial output.
pub fn validate_replication_keys(catalog: &Catalog, policy: KeyPolicy) -> Result<(), ConfigError> {
    if policy == KeyPolicy::Resilient {
        return Ok(());
    }
    for descriptor in catalog.selected() {
        if descriptor.replication_method == ReplicationMethod::Incremental
            && descriptor
                .replication_key
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingReplicationKey {
                stream: descriptor.stream.clone(),
            });
        }
    }
    Ok(())
}

/// Extract every selected stream of the catalog, sequentially.
///
/// A stream abort is isolated: it is recorded in the summary and the
/// next stream still runs. Only configuration rejection, surfaced
/// before any extraction, fails the whole call.
pub async fn extract_catalog(
    source: &dyn DocumentSource,
    sink: &mut dyn RecordSink,
    manager: &mut BookmarkManager,
    store: &dyn StateStore,
    catalog: &Catalog,
    options: &ExtractOptions,
    cancel: &CancellationToken,
) -> Result<SyncSummary, ConfigError> {
    validate_replication_keys(catalog, options.key_policy)?;

    let mut summary = SyncSummary::default();
    for descriptor in catalog.selected() {
        if cancel.is_cancelled() {
            tracing::info!("Cancellation requested; not starting further streams");
            break;
        }
        match extract_stream(source, sink, manager, store, descriptor, options, cancel).await {
            Ok(report) => {
                tracing::info!(
                    "Stream {}: {} records emitted, {} skipped",
                    report.stream,
                    report.emitted,
                    report.skipped
                );
                summary.reports.push(report);
            }
            Err(error) => {
                tracing::error!("Stream {} aborted: {error}", descriptor.stream);
                summary.aborted.push((descriptor.stream.clone(), error));
            }
        }
    }
    Ok(summary)
}

/// Loop phases; errors short-circuit out of any of them.
enum Phase {
    /// Pull the next batch, or notice exhaustion/cancellation.
    Querying,
    /// Drain the current batch one document at a time.
    Emitting(std::vec::IntoIter<Document>),
    /// Persist and emit the final state snapshot.
    Flushing,
    Done,
}

/// What to do with one document's replication key.
enum KeyOutcome {
    /// Emit the document; advance the bookmark when a value is given.
    Emit(Option<Bookmark>),
    /// Skip the document for the given reason.
    Skip(&'static str),
}

/// Extract a single stream.
///
/// Cancellation is only honored between batches, so every emitted batch
/// is followed by bookmark advances before the loop flushes and exits.
pub async fn extract_stream(
    source: &dyn DocumentSource,
    sink: &mut dyn RecordSink,
    manager: &mut BookmarkManager,
    store: &dyn StateStore,
    descriptor: &CollectionDescriptor,
    options: &ExtractOptions,
    cancel: &CancellationToken,
) -> Result<StreamReport, ExtractError> {
    let stream = descriptor.stream.clone();

    let key: Option<&str> = match (descriptor.replication_method, &descriptor.replication_key) {
        (ReplicationMethod::Incremental, Some(k)) if !k.is_empty() => Some(k.as_str()),
        (ReplicationMethod::Incremental, _) => match options.key_policy {
            KeyPolicy::Strict => {
                return Err(ConfigError::MissingReplicationKey { stream }.into());
            }
            KeyPolicy::Resilient => {
                tracing::warn!(
                    "Stream {stream} is INCREMENTAL without a replication key; \
                     falling back to a full scan"
                );
                None
            }
        },
        (ReplicationMethod::FullTable, _) => None,
    };

    let query = match key {
        Some(k) => {
            let bookmark = manager.get(&stream).cloned();
            match &bookmark {
                Some(b) => tracing::info!(
                    "Stream {stream}: incremental read from {k} >= {b}"
                ),
                None => tracing::info!("Stream {stream}: incremental read from the beginning"),
            }
            CollectionQuery::incremental(
                &descriptor.database,
                &descriptor.collection,
                k,
                bookmark,
                options.batch_size,
            )
        }
        None => {
            tracing::info!("Stream {stream}: full scan");
            CollectionQuery::full_scan(
                &descriptor.database,
                &descriptor.collection,
                options.batch_size,
            )
        }
    };

    sink.write_schema(descriptor)
        .await
        .map_err(|cause| ExtractError::Sink {
            stream: stream.clone(),
            cause,
        })?;

    let mut cursor = source
        .open_cursor(&query)
        .await
        .map_err(|cause| ExtractError::Source {
            stream: stream.clone(),
            cause,
        })?;
    let mut report = StreamReport::new(&stream);
    let mut emitted_since_snapshot: u64 = 0;
    let mut phase = Phase::Querying;

    loop {
        phase = match phase {
            Phase::Querying => {
                if cancel.is_cancelled() {
                    tracing::info!("Stream {stream}: cancellation requested; flushing state");
                    Phase::Flushing
                } else {
                    let batch = cursor
                        .next_batch()
                        .await
                        .map_err(|cause| ExtractError::Source {
                            stream: stream.clone(),
                            cause,
                        })?;
                    if batch.is_empty() {
                        Phase::Flushing
                    } else {
                        tracing::debug!(
                            "Stream {stream}: pulled a batch of {} documents",
                            batch.len()
                        );
                        Phase::Emitting(batch.into_iter())
                    }
                }
            }

            Phase::Emitting(mut batch) => match batch.next() {
                None => Phase::Querying,
                Some(document) => {
                    let outcome = match key {
                        Some(k) => key_outcome(
                            &document,
                            k,
                            &stream,
                            manager.kind(&stream),
                            options.key_policy,
                        )?,
                        None => KeyOutcome::Emit(None),
                    };

                    match outcome {
                        KeyOutcome::Emit(candidate) => {
                            sink.write_record(&stream, &document).await.map_err(
                                |cause| ExtractError::Sink {
                                    stream: stream.clone(),
                                    cause,
                                },
                            )?;
                            report.emitted += 1;
                            if let Some(candidate) = candidate {
                                let marker = document.get("_id").and_then(PortableValue::as_str);
                                manager.advance(&stream, candidate, marker)?;
                            }
                            emitted_since_snapshot += 1;
                            if emitted_since_snapshot >= options.state_interval {
                                flush_state(sink, store, manager, &stream).await?;
                                emitted_since_snapshot = 0;
                            }
                        }
                        KeyOutcome::Skip(reason) => {
                            report.skipped += 1;
                            tracing::debug!("Stream {stream}: document skipped: {reason}");
                        }
                    }
                    Phase::Emitting(batch)
                }
            },

            Phase::Flushing => {
                flush_state(sink, store, manager, &stream).await?;
                Phase::Done
            }

            Phase::Done => break,
        };
    }

    Ok(report)
}

fn key_outcome(
    document: &Document,
    key: &str,
    stream: &str,
    declared: Option<BookmarkKind>,
    policy: KeyPolicy,
) -> Result<KeyOutcome, ExtractError> {
    let Some(value) = document.get(key) else {
        return match policy {
            KeyPolicy::Strict => Err(ExtractError::MissingReplicationKey {
                stream: stream.to_string(),
                key: key.to_string(),
            }),
            KeyPolicy::Resilient => Ok(KeyOutcome::Skip("replication key missing")),
        };
    };

    let Some(candidate) = value.as_bookmark() else {
        return match policy {
            KeyPolicy::Strict => Err(ExtractError::UnorderableKey {
                stream: stream.to_string(),
                key: key.to_string(),
            }),
            KeyPolicy::Resilient => Ok(KeyOutcome::Skip("replication key not orderable")),
        };
    };

    if let Some(expected) = declared {
        if expected != candidate.kind() {
            return match policy {
                KeyPolicy::Strict => Err(BookmarkError::KindMismatch {
                    stream: stream.to_string(),
                    expected,
                    found: candidate.kind(),
                }
                .into()),
                KeyPolicy::Resilient => {
                    Ok(KeyOutcome::Skip("replication key kind differs from bookmark"))
                }
            };
        }
    }

    Ok(KeyOutcome::Emit(Some(candidate)))
}

/// Persist the current state, then announce it on the sink.
///
/// Runs only after the records justifying the snapshot were written, so
/// a consumer checkpointing on state never gets ahead of the records.
async fn flush_state(
    sink: &mut dyn RecordSink,
    store: &dyn StateStore,
    manager: &BookmarkManager,
    stream: &str,
) -> Result<(), ExtractError> {
    let snapshot = manager.snapshot();
    store
        .persist(&snapshot)
        .await
        .map_err(|cause| ExtractError::State {
            stream: stream.to_string(),
            cause,
        })?;
    sink.write_state(&snapshot)
        .await
        .map_err(|cause| ExtractError::Sink {
            stream: stream.to_string(),
            cause,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDescriptor;
    use crate::testing::{document, MemorySource, RecordingSink, SinkEvent};
    use bookmark::MemoryStore;

    fn full_table_descriptor(stream: &str, database: &str, collection: &str) -> CollectionDescriptor {
        CollectionDescriptor {
            database: database.to_string(),
            collection: collection.to_string(),
            stream: stream.to_string(),
            replication_method: ReplicationMethod::FullTable,
            replication_key: None,
            selected: true,
            schema: SchemaDescriptor::permissive().to_json(),
        }
    }

    fn incremental_descriptor(
        stream: &str,
        database: &str,
        collection: &str,
        key: &str,
    ) -> CollectionDescriptor {
        CollectionDescriptor {
            replication_method: ReplicationMethod::Incremental,
            replication_key: Some(key.to_string()),
            ..full_table_descriptor(stream, database, collection)
        }
    }

    /// Documents with integer `seq` keys `1..=n` and string ids.
    fn sequenced(n: i64) -> Vec<Document> {
        (1..=n)
            .map(|i| {
                document([
                    ("_id", PortableValue::String(format!("d{i:03}"))),
                    ("seq", PortableValue::Int(i)),
                ])
            })
            .collect()
    }

    fn resilient_options() -> ExtractOptions {
        ExtractOptions {
            key_policy: KeyPolicy::Resilient,
            ..ExtractOptions::default()
        }
    }

    #[tokio::test]
    async fn test_full_table_emits_everything() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(3));
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = full_table_descriptor("db_c", "db", "c");

        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.emitted, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(sink.records("db_c").len(), 3);
        // Schema precedes records; the run closes with a state event.
        assert!(matches!(sink.events[0], SinkEvent::Schema { .. }));
        assert!(matches!(sink.events.last(), Some(SinkEvent::State { .. })));
        // Full scans never move bookmarks.
        assert_eq!(manager.get("db_c"), None);
    }

    #[tokio::test]
    async fn test_full_table_rerun_reemits_everything() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(4));
        let descriptor = full_table_descriptor("db_c", "db", "c");
        let store = MemoryStore::new();
        let mut manager = BookmarkManager::new();

        for _ in 0..2 {
            let mut sink = RecordingSink::new();
            let report = extract_stream(
                &source,
                &mut sink,
                &mut manager,
                &store,
                &descriptor,
                &ExtractOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            assert_eq!(report.emitted, 4);
        }
    }

    #[tokio::test]
    async fn test_incremental_first_run_sets_bookmark() {
        // Source order is shuffled; the cursor sorts by the key.
        let mut docs = sequenced(5);
        docs.swap(0, 4);
        docs.swap(1, 3);
        let source = MemorySource::new().with_collection("db", "c", docs);
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");

        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.emitted, 5);
        assert_eq!(manager.get("db_c"), Some(&Bookmark::Integer(5)));
        assert_eq!(manager.last_record("db_c"), Some("d005"));

        // Records ascend by the replication key.
        let keys: Vec<i64> = sink
            .records("db_c")
            .iter()
            .map(|d| d.get("seq").and_then(PortableValue::as_i64).unwrap())
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_incremental_resume_reads_from_bookmark() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(5));
        let mut sink = RecordingSink::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");

        let mut manager = BookmarkManager::new();
        manager
            .advance("db_c", Bookmark::Integer(3), Some("d003"))
            .unwrap();

        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // The lower bound is inclusive: the boundary document re-emits
        // and replays idempotently downstream.
        let keys: Vec<i64> = sink
            .records("db_c")
            .iter()
            .map(|d| d.get("seq").and_then(PortableValue::as_i64).unwrap())
            .collect();
        assert_eq!(keys, vec![3, 4, 5]);
        assert_eq!(report.emitted, 3);
        assert_eq!(manager.get("db_c"), Some(&Bookmark::Integer(5)));
    }

    #[tokio::test]
    async fn test_resilient_policy_skips_and_counts() {
        // 100 documents, 5 of them missing the replication key.
        let mut docs = sequenced(100);
        for i in [9, 19, 29, 39, 49] {
            docs[i].remove("seq");
        }
        let source = MemorySource::new().with_collection("db", "c", docs);
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");

        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &resilient_options(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.emitted, 95);
        assert_eq!(report.skipped, 5);
        assert_eq!(sink.records("db_c").len(), 95);
        assert_eq!(manager.get("db_c"), Some(&Bookmark::Integer(100)));
    }

    #[tokio::test]
    async fn test_strict_policy_aborts_at_first_missing_key() {
        let mut docs = sequenced(100);
        for i in [9, 19, 29, 39, 49] {
            docs[i].remove("seq");
        }
        let source = MemorySource::new().with_collection("db", "c", docs);
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");

        let result = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ExtractError::MissingReplicationKey { ref key, .. }) if key == "seq"
        ));
        // Missing keys sort first, so the abort precedes any emission,
        // and the bookmark still holds its pre-run value.
        assert_eq!(sink.records("db_c").len(), 0);
        assert_eq!(manager.get("db_c"), None);
        assert_eq!(store.current(), None);
    }

    #[tokio::test]
    async fn test_unorderable_key_follows_policy() {
        let docs = vec![document([
            ("_id", PortableValue::String("a".to_string())),
            ("seq", PortableValue::Bool(true)),
        ])];
        let source = MemorySource::new().with_collection("db", "c", docs);
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        let store = MemoryStore::new();

        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let result = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ExtractError::UnorderableKey { .. })));

        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &resilient_options(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.emitted, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_key_kind_change_follows_policy() {
        let docs = vec![
            document([
                ("_id", PortableValue::String("a".to_string())),
                ("seq", PortableValue::Int(1)),
            ]),
            document([
                ("_id", PortableValue::String("b".to_string())),
                ("seq", PortableValue::Int(2)),
            ]),
            document([
                ("_id", PortableValue::String("c".to_string())),
                ("seq", PortableValue::String("not-a-number".to_string())),
            ]),
        ];
        let source = MemorySource::new().with_collection("db", "c", docs);
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        let store = MemoryStore::new();

        // Resilient: the stray string key is a counted skip, not an
        // emitted record, and the bookmark keeps its integer kind.
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &resilient_options(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.emitted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(manager.get("db_c"), Some(&Bookmark::Integer(2)));

        // Strict: the kind change aborts the stream.
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let result = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(ExtractError::Bookmark(BookmarkError::KindMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_state_snapshot_cadence() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(25));
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        let options = ExtractOptions {
            batch_size: 7,
            state_interval: 10,
            ..ExtractOptions::default()
        };

        extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // Snapshots after records 10 and 20, plus the final flush.
        let bookmarks: Vec<Bookmark> = sink
            .states()
            .iter()
            .map(|s| s.get("db_c").unwrap().replication_key_value.clone())
            .collect();
        assert_eq!(
            bookmarks,
            vec![
                Bookmark::Integer(10),
                Bookmark::Integer(20),
                Bookmark::Integer(25)
            ]
        );

        // The store saw the same snapshots; the last one wins.
        let persisted = store.current().unwrap();
        assert_eq!(
            persisted.get("db_c").map(|s| &s.replication_key_value),
            Some(&Bookmark::Integer(25))
        );
        assert_eq!(
            persisted.get("db_c").and_then(|s| s.last_record.as_deref()),
            Some("d025")
        );
    }

    /// Sink wrapper that requests cancellation after a fixed number of
    /// records, from inside the run.
    struct CancellingSink {
        inner: RecordingSink,
        token: CancellationToken,
        cancel_after: u64,
        written: u64,
    }

    #[async_trait::async_trait]
    impl RecordSink for CancellingSink {
        async fn write_schema(&mut self, stream: &CollectionDescriptor) -> anyhow::Result<()> {
            self.inner.write_schema(stream).await
        }

        async fn write_record(&mut self, stream: &str, doc: &Document) -> anyhow::Result<()> {
            self.inner.write_record(stream, doc).await?;
            self.written += 1;
            if self.written == self.cancel_after {
                self.token.cancel();
            }
            Ok(())
        }

        async fn write_state(&mut self, state: &bookmark::SyncState) -> anyhow::Result<()> {
            self.inner.write_state(state).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_finishes_batch_then_flushes() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(12));
        let token = CancellationToken::new();
        let mut sink = CancellingSink {
            inner: RecordingSink::new(),
            token: token.clone(),
            cancel_after: 5,
            written: 0,
        };
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        let options = ExtractOptions {
            batch_size: 3,
            ..ExtractOptions::default()
        };

        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &options,
            &token,
        )
        .await
        .unwrap();

        // Cancellation hit mid-batch at record 5; the loop finishes the
        // batch (record 6), then flushes instead of pulling more.
        assert_eq!(report.emitted, 6);
        assert_eq!(manager.get("db_c"), Some(&Bookmark::Integer(6)));

        let persisted = store.current().unwrap();
        assert_eq!(
            persisted.get("db_c").map(|s| &s.replication_key_value),
            Some(&Bookmark::Integer(6))
        );
        assert!(matches!(
            sink.inner.events.last(),
            Some(SinkEvent::State { .. })
        ));
    }

    #[tokio::test]
    async fn test_source_fault_preserves_persisted_state() {
        let source = MemorySource::new()
            .with_collection("db", "c", sequenced(12))
            .fail_after_batches(1);
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        let options = ExtractOptions {
            batch_size: 5,
            state_interval: 5,
            ..ExtractOptions::default()
        };

        let result = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &options,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ExtractError::Source { .. })));
        // The snapshot taken after the first batch is still the
        // resumable position.
        assert_eq!(sink.records("db_c").len(), 5);
        let persisted = store.current().unwrap();
        assert_eq!(
            persisted.get("db_c").map(|s| &s.replication_key_value),
            Some(&Bookmark::Integer(5))
        );
    }

    #[tokio::test]
    async fn test_incremental_without_key_resilient_full_scan() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(3));
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let mut descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        descriptor.replication_key = None;

        let report = extract_stream(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &descriptor,
            &resilient_options(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.emitted, 3);
        assert_eq!(manager.get("db_c"), None);
    }

    #[test]
    fn test_validate_replication_keys() {
        let mut catalog = Catalog {
            streams: vec![incremental_descriptor("db_c", "db", "c", "seq")],
        };
        assert!(validate_replication_keys(&catalog, KeyPolicy::Strict).is_ok());

        catalog.streams[0].replication_key = Some(String::new());
        assert_eq!(
            validate_replication_keys(&catalog, KeyPolicy::Strict),
            Err(ConfigError::MissingReplicationKey {
                stream: "db_c".to_string()
            })
        );

        catalog.streams[0].replication_key = None;
        assert!(validate_replication_keys(&catalog, KeyPolicy::Resilient).is_ok());

        // Unselected streams are not validated.
        catalog.streams[0].selected = false;
        assert!(validate_replication_keys(&catalog, KeyPolicy::Strict).is_ok());
    }

    #[tokio::test]
    async fn test_extract_catalog_isolates_stream_faults() {
        let source = MemorySource::new()
            .with_collection("db", "a", sequenced(2))
            .with_collection("db", "b", sequenced(2))
            .with_collection("db", "c", sequenced(2))
            .deny_collection("db", "b");
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let catalog = Catalog {
            streams: vec![
                full_table_descriptor("db_a", "db", "a"),
                full_table_descriptor("db_b", "db", "b"),
                full_table_descriptor("db_c", "db", "c"),
            ],
        };

        let summary = extract_catalog(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &catalog,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!summary.all_ok());
        assert_eq!(summary.reports.len(), 2);
        assert_eq!(summary.total_emitted(), 4);
        assert_eq!(summary.aborted.len(), 1);
        assert_eq!(summary.aborted[0].0, "db_b");
    }

    #[tokio::test]
    async fn test_extract_catalog_rejects_bad_config_before_output() {
        let source = MemorySource::new().with_collection("db", "c", sequenced(2));
        let mut sink = RecordingSink::new();
        let mut manager = BookmarkManager::new();
        let store = MemoryStore::new();
        let mut descriptor = incremental_descriptor("db_c", "db", "c", "seq");
        descriptor.replication_key = None;
        let catalog = Catalog {
            streams: vec![descriptor],
        };

        let result = extract_catalog(
            &source,
            &mut sink,
            &mut manager,
            &store,
            &catalog,
            &ExtractOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            result.unwrap_err(),
            ConfigError::MissingReplicationKey {
                stream: "db_c".to_string()
            }
        );
        assert!(sink.events.is_empty());
    }
}
