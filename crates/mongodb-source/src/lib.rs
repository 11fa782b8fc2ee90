//! MongoDB document source for mongo-tap.
//!
//! Implements the extraction engine's source traits on top of the official
//! MongoDB driver. Database and collection enumeration, `$sample`-based
//! schema sampling and bookmark-bounded `find` cursors all live here, and
//! every document is coerced to portable values at this boundary so
//! everything downstream stays driver-free.

mod source;

pub use source::MongoSource;
