//! MongoDB/BSON coercion into tap-core portable values.
//!
//! This crate provides the one-way conversion from BSON documents to
//! the portable value tree everything above the driver operates on.
//!
//! # Modules
//!
//! - [`coerce`] - BSON value → PortableValue conversion
//!
//! # Example
//!
//! ```rust
//! use bson::doc;
//! use mongodb_types::coerce_document;
//! use tap_core::values::PortableValue;
//!
//! let oid = bson::oid::ObjectId::new();
//! let document = coerce_document(doc! { "_id": oid, "count": 3_i32 }).unwrap();
//! assert_eq!(
//!     document.get("_id"),
//!     Some(&PortableValue::String(oid.to_hex()))
//! );
//! assert_eq!(document.get("count"), Some(&PortableValue::Int(3)));
//! ```

pub mod coerce;

pub use coerce::{coerce_document, coerce_value, CoerceError};
