//! Bookmark value type and its ordering rules.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The kind of value a stream's bookmark is ordered by.
///
/// Persisted alongside the bookmark value; the tag is what keeps a
/// string bookmark that merely looks like a timestamp from reloading
/// as a date-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookmarkKind {
    /// Signed 64-bit integer keys.
    Integer,
    /// UTC date-time keys.
    DateTime,
    /// Plain string keys, ordered lexicographically.
    String,
}

impl BookmarkKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkKind::Integer => "integer",
            BookmarkKind::DateTime => "date-time",
            BookmarkKind::String => "string",
        }
    }
}

impl std::fmt::Display for BookmarkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for bookmark operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BookmarkError {
    /// A candidate value's kind differs from the stream's declared kind.
    #[error("stream '{stream}' is ordered by {expected} bookmarks, got a {found} value")]
    KindMismatch {
        stream: String,
        expected: BookmarkKind,
        found: BookmarkKind,
    },
}

/// A stream's replication high-water mark.
///
/// A bookmark is an ordered scalar: the highest replication key value
/// among all records emitted so far for a stream. Ordering is only
/// defined within a kind; [`Bookmark::try_cmp`] returns `None` when the
/// kinds differ and callers decide how to surface that.
///
/// # Persisted form
///
/// Bookmarks serialize as bare scalars so the state file stays readable
/// and round-trips through the record representation of the key's type:
/// integers as JSON numbers, date-times as RFC 3339 strings, strings as
/// strings. Date-time and string bookmarks share that JSON shape, so
/// the scalar alone cannot be loaded back; the persisted stream state
/// carries the [`BookmarkKind`] beside the value and reconstruction
/// happens there.
#[derive(Debug, Clone, PartialEq)]
pub enum Bookmark {
    /// Integer replication key (BSON int32/int64).
    Integer(i64),
    /// Date-time replication key, normalized to UTC.
    DateTime(DateTime<Utc>),
    /// String replication key.
    String(String),
}

impl Bookmark {
    /// The kind this bookmark is ordered by.
    pub fn kind(&self) -> BookmarkKind {
        match self {
            Bookmark::Integer(_) => BookmarkKind::Integer,
            Bookmark::DateTime(_) => BookmarkKind::DateTime,
            Bookmark::String(_) => BookmarkKind::String,
        }
    }

    /// Compare two bookmarks of the same kind.
    ///
    /// Returns `None` when the kinds differ. Cross-kind ordering is
    /// deliberately undefined: the caller surfaces a
    /// [`BookmarkError::KindMismatch`] instead of guessing.
    pub fn try_cmp(&self, other: &Bookmark) -> Option<Ordering> {
        match (self, other) {
            (Bookmark::Integer(a), Bookmark::Integer(b)) => Some(a.cmp(b)),
            (Bookmark::DateTime(a), Bookmark::DateTime(b)) => Some(a.cmp(b)),
            (Bookmark::String(a), Bookmark::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Render the bookmark the way it appears in the state file.
    ///
    /// Used for logging; the JSON form adds quoting for strings.
    pub fn to_display_string(&self) -> String {
        match self {
            Bookmark::Integer(i) => i.to_string(),
            Bookmark::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            Bookmark::String(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl Serialize for Bookmark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Bookmark::Integer(i) => serializer.serialize_i64(*i),
            Bookmark::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Bookmark::String(s) => serializer.serialize_str(s),
        }
    }
}
