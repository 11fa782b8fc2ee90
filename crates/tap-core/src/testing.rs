//! In-memory source and sink doubles.
//!
//! [`MemorySource`] emulates the server-side behavior extraction relies
//! on: lower-bound filtering, ascending sort by the replication key and
//! batched cursor pulls, plus access-denial and mid-read fault
//! injection. [`RecordingSink`] captures the full ordered event stream
//! a run produces. Together they make extraction and discovery fully
//! testable without a database.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use bookmark::{Bookmark, BookmarkKind, SyncState};

use crate::catalog::CollectionDescriptor;
use crate::sink::RecordSink;
use crate::source::{CollectionQuery, DocumentCursor, DocumentSource, SourceError};
use crate::values::{Document, PortableValue};

/// Build a document from field pairs.
pub fn document<'a, I>(fields: I) -> Document
where
    I: IntoIterator<Item = (&'a str, PortableValue)>,
{
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// In-memory implementation of [`DocumentSource`].
///
/// Built with a fluent constructor; immutable once handed to the code
/// under test.
#[derive(Default)]
pub struct MemorySource {
    collections: BTreeMap<String, Vec<String>>,
    documents: HashMap<(String, String), Vec<Document>>,
    denied_databases: HashSet<String>,
    denied_collections: HashSet<(String, String)>,
    fail_after_batches: Option<usize>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection with its documents.
    pub fn with_collection(
        mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Self {
        self.collections
            .entry(database.to_string())
            .or_default()
            .push(collection.to_string());
        self.documents
            .insert((database.to_string(), collection.to_string()), documents);
        self
    }

    /// Deny listing collections within a database.
    pub fn deny_database(mut self, database: &str) -> Self {
        self.denied_databases.insert(database.to_string());
        self
    }

    /// Deny sampling and reading a collection.
    pub fn deny_collection(mut self, database: &str, collection: &str) -> Self {
        self.denied_collections
            .insert((database.to_string(), collection.to_string()));
        self
    }

    /// Make every opened cursor fail after serving this many batches.
    pub fn fail_after_batches(mut self, batches: usize) -> Self {
        self.fail_after_batches = Some(batches);
        self
    }

    fn check_collection_access(&self, database: &str, collection: &str) -> Result<(), SourceError> {
        if self
            .denied_collections
            .contains(&(database.to_string(), collection.to_string()))
        {
            return Err(SourceError::AccessDenied(format!(
                "not authorized on {database}.{collection}"
            )));
        }
        Ok(())
    }

    fn docs(&self, database: &str, collection: &str) -> Vec<Document> {
        self.documents
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Stable cross-kind ordering for the emulated sort, loosely following
/// the server's type bracketing: numbers, then strings, then dates.
fn kind_rank(kind: BookmarkKind) -> u8 {
    match kind {
        BookmarkKind::Integer => 0,
        BookmarkKind::String => 1,
        BookmarkKind::DateTime => 2,
    }
}

fn compare_by_key(a: &Document, b: &Document, key: &str) -> Ordering {
    let ka = a.get(key).and_then(PortableValue::as_bookmark);
    let kb = b.get(key).and_then(PortableValue::as_bookmark);
    match (ka, kb) {
        (None, None) => Ordering::Equal,
        // Documents without the key sort first, like missing fields in
        // an ascending server sort.
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .try_cmp(&b)
            .unwrap_or_else(|| kind_rank(a.kind()).cmp(&kind_rank(b.kind()))),
    }
}

fn matches_lower_bound(doc: &Document, key: &str, bound: &Bookmark) -> bool {
    doc.get(key)
        .and_then(PortableValue::as_bookmark)
        .and_then(|candidate| candidate.try_cmp(bound))
        .map_or(false, |ordering| ordering != Ordering::Less)
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn list_databases(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.collections.keys().cloned().collect())
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, SourceError> {
        if self.denied_databases.contains(database) {
            return Err(SourceError::AccessDenied(format!(
                "not authorized on {database}"
            )));
        }
        Ok(self.collections.get(database).cloned().unwrap_or_default())
    }

    async fn sample(
        &self,
        database: &str,
        collection: &str,
        size: u32,
    ) -> Result<Vec<Document>, SourceError> {
        self.check_collection_access(database, collection)?;
        let mut docs = self.docs(database, collection);
        docs.truncate(size as usize);
        Ok(docs)
    }

    async fn open_cursor(
        &self,
        query: &CollectionQuery,
    ) -> Result<Box<dyn DocumentCursor>, SourceError> {
        self.check_collection_access(&query.database, &query.collection)?;

        let mut docs = self.docs(&query.database, &query.collection);
        if let Some((key, bound)) = &query.lower_bound {
            docs.retain(|doc| matches_lower_bound(doc, key, bound));
        }
        if let Some(key) = &query.sort_key {
            docs.sort_by(|a, b| compare_by_key(a, b, key));
        }

        let batch_size = (query.batch_size as usize).max(1);
        let batches = docs
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(Box::new(MemoryCursor {
            batches,
            fail_after: self.fail_after_batches,
            served: 0,
        }))
    }
}

/// Cursor over pre-chunked batches, with optional fault injection.
pub struct MemoryCursor {
    batches: VecDeque<Vec<Document>>,
    fail_after: Option<usize>,
    served: usize,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_batch(&mut self) -> Result<Vec<Document>, SourceError> {
        if let Some(limit) = self.fail_after {
            if self.served >= limit {
                return Err(SourceError::Other(anyhow::anyhow!(
                    "cursor connection lost"
                )));
            }
        }
        match self.batches.pop_front() {
            Some(batch) => {
                self.served += 1;
                Ok(batch)
            }
            None => Ok(Vec::new()),
        }
    }
}

/// One event written to a [`RecordingSink`].
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// A stream announcement.
    Schema {
        /// Stream name.
        stream: String,
        /// Schema JSON as the sink received it.
        schema: serde_json::Value,
    },
    /// A record emission.
    Record {
        /// Stream name.
        stream: String,
        /// The emitted document.
        document: Document,
    },
    /// A state snapshot.
    State {
        /// The snapshot as the sink received it.
        state: SyncState,
    },
}

/// Sink that records every write in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Everything written, in write order.
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents recorded for one stream, in emission order.
    pub fn records(&self, stream: &str) -> Vec<&Document> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Record {
                    stream: s,
                    document,
                } if s == stream => Some(document),
                _ => None,
            })
            .collect()
    }

    /// State snapshots in emission order.
    pub fn states(&self) -> Vec<&SyncState> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::State { state } => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Announced streams with their schema JSON, in emission order.
    pub fn schemas(&self) -> Vec<(&str, &serde_json::Value)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Schema { stream, schema } => Some((stream.as_str(), schema)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn write_schema(&mut self, stream: &CollectionDescriptor) -> anyhow::Result<()> {
        self.events.push(SinkEvent::Schema {
            stream: stream.stream.clone(),
            schema: stream.schema.clone(),
        });
        Ok(())
    }

    async fn write_record(&mut self, stream: &str, document: &Document) -> anyhow::Result<()> {
        self.events.push(SinkEvent::Record {
            stream: stream.to_string(),
            document: document.clone(),
        });
        Ok(())
    }

    async fn write_state(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.events.push(SinkEvent::State {
            state: state.clone(),
        });
        Ok(())
    }
}
