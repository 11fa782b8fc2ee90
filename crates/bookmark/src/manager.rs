//! Owner of all bookmark state mutation.

use crate::state::{StreamState, SyncState};
use crate::value::{Bookmark, BookmarkError, BookmarkKind};

/// Manager for per-stream replication bookmarks.
///
/// All bookmark motion goes through [`BookmarkManager::advance`], which
/// enforces monotonicity: a candidate only replaces the current bookmark
/// when it is strictly greater under the stream's declared ordering.
/// Extraction loops hold the manager mutably for the streams they drive;
/// [`BookmarkManager::snapshot`] hands out an owned copy safe to persist
/// while extraction continues.
///
/// # Example
///
/// ```rust
/// use bookmark::{Bookmark, BookmarkManager, SyncState};
///
/// let mut manager = BookmarkManager::load(SyncState::new());
/// let changed = manager
///     .advance("mydb_orders", Bookmark::Integer(42), Some("order-42"))
///     .unwrap();
/// assert!(changed);
/// assert_eq!(manager.get("mydb_orders"), Some(&Bookmark::Integer(42)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BookmarkManager {
    state: SyncState,
}

impl BookmarkManager {
    /// Create a manager with no bookmarks (everything extracts from the
    /// beginning).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager from previously persisted state.
    pub fn load(state: SyncState) -> Self {
        Self { state }
    }

    /// Get a stream's current bookmark, if it has one.
    pub fn get(&self, stream: &str) -> Option<&Bookmark> {
        self.state
            .bookmarks
            .get(stream)
            .map(|s| &s.replication_key_value)
    }

    /// Get the kind a stream's bookmark is ordered by, if declared yet.
    ///
    /// The kind is declared by persisted state or by the first `advance`
    /// on the stream.
    pub fn kind(&self, stream: &str) -> Option<BookmarkKind> {
        self.get(stream).map(Bookmark::kind)
    }

    /// Get the opaque last-record marker for a stream, if recorded.
    pub fn last_record(&self, stream: &str) -> Option<&str> {
        self.state
            .bookmarks
            .get(stream)
            .and_then(|s| s.last_record.as_deref())
    }

    /// Offer a candidate bookmark value for a stream.
    ///
    /// Returns `Ok(true)` when the bookmark moved forward. The candidate
    /// is ignored (`Ok(false)`) when it does not strictly exceed the
    /// current value, which keeps the bookmark monotonic even if the
    /// underlying query returns documents out of order.
    ///
    /// A candidate equal to the current bookmark still refreshes the
    /// last-record marker, so a resume at the same boundary value knows
    /// which record was emitted last.
    ///
    /// # Errors
    ///
    /// [`BookmarkError::KindMismatch`] when the candidate's kind differs
    /// from the stream's declared kind.
    pub fn advance(
        &mut self,
        stream: &str,
        candidate: Bookmark,
        marker: Option<&str>,
    ) -> Result<bool, BookmarkError> {
        let Some(entry) = self.state.bookmarks.get_mut(stream) else {
            // First value seen for this stream declares its kind.
            self.state.bookmarks.insert(
                stream.to_string(),
                StreamState {
                    replication_key_value: candidate,
                    last_record: marker.map(str::to_string),
                },
            );
            return Ok(true);
        };

        let current = &entry.replication_key_value;
        let Some(order) = candidate.try_cmp(current) else {
            return Err(BookmarkError::KindMismatch {
                stream: stream.to_string(),
                expected: current.kind(),
                found: candidate.kind(),
            });
        };

        match order {
            std::cmp::Ordering::Greater => {
                entry.replication_key_value = candidate;
                entry.last_record = marker.map(str::to_string);
                Ok(true)
            }
            std::cmp::Ordering::Equal => {
                if let Some(m) = marker {
                    entry.last_record = Some(m.to_string());
                }
                Ok(false)
            }
            std::cmp::Ordering::Less => Ok(false),
        }
    }

    /// Take a point-in-time copy of the full state for persistence.
    pub fn snapshot(&self) -> SyncState {
        self.state.clone()
    }
}
