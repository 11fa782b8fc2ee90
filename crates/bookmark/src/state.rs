//! Persisted sync state layout.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::{Bookmark, BookmarkKind};

/// Per-stream slice of the persisted state.
///
/// Holds the stream's bookmark plus an opaque marker identifying the
/// last record emitted at that bookmark value. The marker breaks ties
/// when several records share the boundary key value across a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredStreamState", try_from = "StoredStreamState")]
pub struct StreamState {
    /// Highest replication key value emitted so far.
    pub replication_key_value: Bookmark,

    /// Identifier of the last record emitted at that value, if known.
    pub last_record: Option<String>,
}

impl StreamState {
    /// Create a stream state from a bookmark value.
    pub fn new(replication_key_value: Bookmark) -> Self {
        Self {
            replication_key_value,
            last_record: None,
        }
    }
}

/// Wire form of a [`StreamState`].
///
/// The bookmark is stored as a bare scalar plus its kind tag. Date-time
/// and string bookmarks share the JSON string shape, so without the tag
/// a string key holding timestamp-looking text would reload as a
/// date-time and every subsequent advance would be a kind mismatch.
#[derive(Serialize, Deserialize)]
struct StoredStreamState {
    replication_key_value: StoredScalar,
    replication_key_kind: BookmarkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_record: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredScalar {
    Integer(i64),
    Text(String),
}

impl From<StreamState> for StoredStreamState {
    fn from(state: StreamState) -> Self {
        let replication_key_kind = state.replication_key_value.kind();
        let replication_key_value = match state.replication_key_value {
            Bookmark::Integer(i) => StoredScalar::Integer(i),
            Bookmark::DateTime(dt) => {
                StoredScalar::Text(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Bookmark::String(s) => StoredScalar::Text(s),
        };
        Self {
            replication_key_value,
            replication_key_kind,
            last_record: state.last_record,
        }
    }
}

/// The state file holds a scalar that disagrees with its kind tag.
#[derive(Debug, thiserror::Error)]
#[error("stored bookmark declares kind {declared} but holds {found}")]
pub struct StateLayoutError {
    declared: BookmarkKind,
    found: String,
}

impl TryFrom<StoredStreamState> for StreamState {
    type Error = StateLayoutError;

    fn try_from(stored: StoredStreamState) -> Result<Self, Self::Error> {
        let declared = stored.replication_key_kind;
        let mismatch = |found: &str| StateLayoutError {
            declared,
            found: found.to_string(),
        };

        let replication_key_value = match (declared, stored.replication_key_value) {
            (BookmarkKind::Integer, StoredScalar::Integer(i)) => Bookmark::Integer(i),
            (BookmarkKind::String, StoredScalar::Text(s)) => Bookmark::String(s),
            (BookmarkKind::DateTime, StoredScalar::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Bookmark::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| mismatch("a non-RFC 3339 string"))?,
            (_, StoredScalar::Integer(_)) => return Err(mismatch("a number")),
            (BookmarkKind::Integer, StoredScalar::Text(_)) => return Err(mismatch("a string")),
        };

        Ok(Self {
            replication_key_value,
            last_record: stored.last_record,
        })
    }
}

/// The complete persisted sync state.
///
/// Maps stream names to their [`StreamState`]. Serializes to the state
/// file layout:
///
/// ```json
/// {
///     "bookmarks": {
///         "mydb_orders": {
///             "replication_key_value": "2024-01-01T00:00:00.000Z",
///             "replication_key_kind": "date-time",
///             "last_record": "65f1a2b3c4d5e6f7a8b9c0d1"
///         }
///     }
/// }
/// ```
///
/// The map is ordered so repeated serializations of the same state are
/// byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Stream name to bookmark state.
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamState>,
}

impl SyncState {
    /// Create an empty state (every stream starts unbounded).
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stream's state, if any.
    pub fn get(&self, stream: &str) -> Option<&StreamState> {
        self.bookmarks.get(stream)
    }

    /// Whether no stream has a bookmark yet.
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }
}
