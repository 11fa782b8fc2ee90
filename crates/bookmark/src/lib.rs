//! Bookmark state management for mongo-tap
//!
//! Provides per-stream replication bookmarks with storage-agnostic
//! persistence.
//!
//! # Architecture
//!
//! This crate owns everything about "where did this stream get to":
//! - Defines the [`Bookmark`] value type and its within-kind ordering
//! - Holds the persisted [`SyncState`] aggregate (one entry per stream)
//! - Mediates all mutation through [`BookmarkManager`], whose `advance`
//!   guarantees monotonic forward motion
//! - Persists state via the [`StateStore`] trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - stores the state document as a JSON file,
//!   replaced atomically on every persist
//! - `MemoryStore` - keeps the state in memory, used by tests and dry
//!   runs
//!
//! A bookmark is one of three kinds: a signed integer, a UTC date-time,
//! or a string. Ordering is only defined between values of the same
//! kind; a stream's kind is fixed by its persisted state or by the first
//! value it advances to, and comparing across kinds is an error rather
//! than a guess.

mod filesystem;
mod manager;
mod memory;
mod state;
mod store;
mod value;


// Re-export value types
pub use value::{Bookmark, BookmarkError, BookmarkKind};

// Re-export state types
pub use state::{StreamState, SyncState};

// Re-export manager
pub use manager::BookmarkManager;

// Re-export store trait and implementations
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use store::StateStore;
