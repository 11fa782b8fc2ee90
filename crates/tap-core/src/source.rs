//! Traits at the driver boundary.
//!
//! The extraction engine never talks to a database driver directly; it
//! sees a [`DocumentSource`] for enumeration, sampling and cursor
//! opening, and a [`DocumentCursor`] for batched pulls. Driver crates
//! implement these and perform value coercion before handing documents
//! over, so everything above this seam is driver-free and testable in
//! memory.

use async_trait::async_trait;

use bookmark::Bookmark;

use crate::values::Document;

/// Error surfaced by a document source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A document carried a native type with no portable form.
    #[error("unsupported source type {type_name} at {path}")]
    Unsupported {
        /// Native type name as reported by the driver.
        type_name: String,
        /// Dotted field path of the offending value.
        path: String,
    },

    /// The source refused access to a database or collection.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Any other driver or transport fault.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Description of one collection read.
///
/// Carries everything a source needs to open a cursor: an optional
/// lower bound translated to a `{key: {"$gte": bookmark}}` filter, an
/// optional ascending sort key, and the batch size. Incremental reads
/// set both; full scans set neither and run in natural order.
#[derive(Debug, Clone)]
pub struct CollectionQuery {
    /// Database holding the collection.
    pub database: String,
    /// Collection to read.
    pub collection: String,
    /// Replication key name and inclusive lower bound, if resuming.
    pub lower_bound: Option<(String, Bookmark)>,
    /// Field to sort ascending by, if any.
    pub sort_key: Option<String>,
    /// Documents per cursor batch.
    pub batch_size: u32,
}

impl CollectionQuery {
    /// Query for a full scan in natural order.
    pub fn full_scan(database: &str, collection: &str, batch_size: u32) -> Self {
        Self {
            database: database.to_string(),
            collection: collection.to_string(),
            lower_bound: None,
            sort_key: None,
            batch_size,
        }
    }

    /// Query for an incremental read ordered by `key`.
    ///
    /// With a bookmark the read starts at the bookmark inclusively;
    /// records at the boundary value re-emit and replay idempotently
    /// downstream.
    pub fn incremental(
        database: &str,
        collection: &str,
        key: &str,
        bookmark: Option<Bookmark>,
        batch_size: u32,
    ) -> Self {
        Self {
            database: database.to_string(),
            collection: collection.to_string(),
            lower_bound: bookmark.map(|b| (key.to_string(), b)),
            sort_key: Some(key.to_string()),
            batch_size,
        }
    }
}

/// Batched pull over one collection read.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Pull the next batch of coerced documents.
    ///
    /// An empty batch means the cursor is exhausted. Implementations
    /// return at most the query's batch size per call but may return
    /// fewer.
    async fn next_batch(&mut self) -> Result<Vec<Document>, SourceError>;
}

/// A connected document database, as seen by discovery and extraction.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List database names visible to the connection.
    async fn list_databases(&self) -> Result<Vec<String>, SourceError>;

    /// List collection names within one database.
    async fn list_collections(&self, database: &str) -> Result<Vec<String>, SourceError>;

    /// Draw up to `size` documents from a collection for schema
    /// inference. Order is unspecified.
    async fn sample(
        &self,
        database: &str,
        collection: &str,
        size: u32,
    ) -> Result<Vec<Document>, SourceError>;

    /// Open a cursor for the given query.
    async fn open_cursor(
        &self,
        query: &CollectionQuery,
    ) -> Result<Box<dyn DocumentCursor>, SourceError>;
}
