//! Driver-backed implementation of the source traits.

use std::time::Duration;

use async_trait::async_trait;
use bookmark::Bookmark;
use bson::{doc, Bson, Document};
use mongodb::{options::ClientOptions, Client};

use mongodb_types::CoerceError;
use tap_core::source::{CollectionQuery, DocumentCursor, DocumentSource, SourceError};
use tap_core::values::Document as PortableDocument;

/// Server error code returned when the connection lacks a privilege.
const UNAUTHORIZED: i32 = 13;

/// A connected MongoDB deployment.
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    /// Connects to the deployment at `uri`.
    ///
    /// Connection establishment and server selection are both capped at
    /// ten seconds so an unreachable deployment fails fast instead of
    /// hanging the run.
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));
        let client = Client::with_options(options)?;
        tracing::debug!("Created MongoDB client");
        Ok(Self { client })
    }
}

/// Maps a driver error, surfacing missing privileges as access denials so
/// callers can skip restricted databases instead of aborting.
fn map_error(err: mongodb::error::Error) -> SourceError {
    if let mongodb::error::ErrorKind::Command(ref command_error) = *err.kind {
        if command_error.code == UNAUTHORIZED {
            return SourceError::AccessDenied(command_error.message.clone());
        }
    }
    SourceError::Other(err.into())
}

fn unsupported(err: CoerceError) -> SourceError {
    SourceError::Unsupported {
        type_name: err.type_name.to_string(),
        path: err.path,
    }
}

fn bookmark_to_bson(bookmark: &Bookmark) -> Bson {
    match bookmark {
        Bookmark::Integer(i) => Bson::Int64(*i),
        Bookmark::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Bookmark::String(s) => Bson::String(s.clone()),
    }
}

/// Builds the find filter for a query.
///
/// A resuming incremental read filters on `{key: {"$gte": bookmark}}`; the
/// bound is inclusive so the boundary document re-emits after a restart.
/// Everything else scans unfiltered.
fn find_filter(query: &CollectionQuery) -> Document {
    match &query.lower_bound {
        Some((key, bookmark)) => {
            let mut filter = Document::new();
            filter.insert(key.clone(), doc! { "$gte": bookmark_to_bson(bookmark) });
            filter
        }
        None => doc! {},
    }
}

/// Builds the ascending sort document for a query, if it orders by a key.
fn find_sort(query: &CollectionQuery) -> Option<Document> {
    query.sort_key.as_ref().map(|key| {
        let mut sort = Document::new();
        sort.insert(key.clone(), 1);
        sort
    })
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn list_databases(&self) -> Result<Vec<String>, SourceError> {
        self.client.list_database_names().await.map_err(map_error)
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, SourceError> {
        self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(map_error)
    }

    async fn sample(
        &self,
        database: &str,
        collection: &str,
        size: u32,
    ) -> Result<Vec<PortableDocument>, SourceError> {
        let handle = self
            .client
            .database(database)
            .collection::<Document>(collection);
        tracing::debug!(
            "Sampling up to {} documents from {}.{}",
            size,
            database,
            collection
        );
        let mut cursor = handle
            .aggregate(vec![doc! { "$sample": { "size": i64::from(size) } }])
            .await
            .map_err(map_error)?;

        let mut sampled = Vec::new();
        while cursor.advance().await.map_err(map_error)? {
            let document: Document = cursor
                .current()
                .try_into()
                .map_err(|e| SourceError::Other(anyhow::Error::new(e)))?;
            sampled.push(mongodb_types::coerce_document(document).map_err(unsupported)?);
        }
        Ok(sampled)
    }

    async fn open_cursor(
        &self,
        query: &CollectionQuery,
    ) -> Result<Box<dyn DocumentCursor>, SourceError> {
        let handle = self
            .client
            .database(&query.database)
            .collection::<Document>(&query.collection);

        let filter = find_filter(query);
        tracing::debug!(
            "Opening cursor on {}.{} with filter {}",
            query.database,
            query.collection,
            filter
        );
        let mut find = handle.find(filter).batch_size(query.batch_size);
        if let Some(sort) = find_sort(query) {
            find = find.sort(sort);
        }
        let cursor = find.await.map_err(map_error)?;

        Ok(Box::new(MongoCursor {
            cursor,
            batch_size: (query.batch_size as usize).max(1),
            done: false,
        }))
    }
}

/// Batched wrapper over a driver cursor.
struct MongoCursor {
    cursor: mongodb::Cursor<Document>,
    batch_size: usize,
    done: bool,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next_batch(&mut self) -> Result<Vec<PortableDocument>, SourceError> {
        if self.done {
            return Ok(Vec::new());
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if !self.cursor.advance().await.map_err(map_error)? {
                self.done = true;
                break;
            }
            tracing::trace!("Decoding document {} of the current batch", batch.len() + 1);
            let document: Document = self
                .cursor
                .current()
                .try_into()
                .map_err(|e| SourceError::Other(anyhow::Error::new(e)))?;
            batch.push(mongodb_types::coerce_document(document).map_err(unsupported)?);
        }
        Ok(batch)
    }
}
