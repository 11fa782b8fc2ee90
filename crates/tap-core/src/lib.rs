//! Core types for the mongo-tap extraction engine.
//!
//! This crate provides the foundational pieces shared across the tap,
//! including:
//!
//! - [`PortableValue`] - Driver-agnostic document value representation
//! - [`SchemaDescriptor`] - Permissive or sample-inferred stream schemas
//! - [`Catalog`] / [`CollectionDescriptor`] - Discovery output consumed at sync time
//! - [`DocumentSource`] / [`RecordSink`] - Traits at the driver and output seams
//! - [`extract_catalog`] - The incremental extraction loop over all of the above
//!
//! # Architecture
//!
//! The tap-core crate sits at the foundation of the tap:
//!
//! ```text
//! tap-core (this crate)
//!    │
//!    ├─── mongodb-types   (coerces BSON into PortableValue)
//!    ├─── mongodb-source  (implements DocumentSource over the driver)
//!    └─── mongo-tap       (CLI wiring discovery and sync together)
//! ```
//!
//! Everything here operates on portable values and the source/sink
//! traits, so the extraction and schema logic is testable without a
//! running database; the `testing` module provides in-memory doubles
//! for exactly that.
//!
//! # Example
//!
//! ```rust
//! use tap_core::values::PortableValue;
//! use tap_core::schema::SchemaDescriptor;
//!
//! // Infer a schema descriptor from sampled documents
//! let docs = vec![tap_core::testing::document([
//!     ("_id", PortableValue::String("65f1a2b3c4d5e6f7a8b9c0d1".into())),
//!     ("count", PortableValue::Int(3)),
//! ])];
//! let descriptor = SchemaDescriptor::infer(&docs);
//! let json = descriptor.to_json();
//! assert_eq!(json["properties"]["count"]["type"], "integer");
//! ```

pub mod catalog;
pub mod extract;
pub mod schema;
pub mod sink;
pub mod source;
pub mod testing;
pub mod values;

// Re-exports for convenience
pub use catalog::{
    build_catalog, Catalog, CatalogError, CollectionDescriptor, ConfigError, DatabaseFilter,
    ReplicationMethod, ReplicationOverride,
};
pub use extract::{
    extract_catalog, extract_stream, validate_replication_keys, ExtractError, ExtractOptions,
    KeyPolicy, StreamReport, SyncSummary,
};
pub use schema::{resolve_schema, SchemaDescriptor, SchemaMode};
pub use sink::RecordSink;
pub use source::{CollectionQuery, DocumentCursor, DocumentSource, SourceError};
pub use values::{document_to_json, Document, PortableKind, PortableValue};
