//! Collection discovery and catalog construction.
//!
//! Discovery walks every admitted database, resolves a schema per
//! collection and produces a [`Catalog`]: the ordered set of
//! [`CollectionDescriptor`]s that sync later consumes. Databases and
//! collections the connection is not allowed to see are skipped, not
//! fatal, so a restricted user still discovers everything it can read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::{resolve_schema, SchemaMode};
use crate::source::{DocumentSource, SourceError};

/// Error in the discovery/extraction configuration.
///
/// Always surfaced before any extraction work begins.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    /// Database include and exclude lists were both given.
    #[error("database include and exclude lists are mutually exclusive")]
    ConflictingFilter,

    /// An INCREMENTAL stream has no replication key under strict policy.
    #[error("stream '{stream}' is INCREMENTAL but declares no replication key")]
    MissingReplicationKey {
        /// Stream missing the key.
        stream: String,
    },

    /// Schema inference was enabled with a zero sample size.
    #[error("schema inference sample size must be at least 1")]
    InvalidSampleSize,
}

/// Error during catalog construction.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The configuration was rejected before any source I/O.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The source failed mid-discovery.
    #[error("discovery failed while {context}")]
    Source {
        /// What discovery was doing when the source failed.
        context: String,
        /// Underlying source fault.
        #[source]
        cause: SourceError,
    },
}

/// How a stream's documents are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplicationMethod {
    /// Re-read the whole collection every run.
    #[default]
    #[serde(rename = "FULL_TABLE")]
    FullTable,
    /// Read only documents at or past the stream's bookmark.
    #[serde(rename = "INCREMENTAL")]
    Incremental,
}

impl std::fmt::Display for ReplicationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMethod::FullTable => f.write_str("FULL_TABLE"),
            ReplicationMethod::Incremental => f.write_str("INCREMENTAL"),
        }
    }
}

/// One discovered collection with its resolved schema and replication
/// settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Database holding the collection.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Derived stream name; what overrides and state key against.
    pub stream: String,
    /// How this stream is read.
    pub replication_method: ReplicationMethod,
    /// Document field ordering incremental reads, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Whether sync extracts this stream.
    #[serde(default)]
    pub selected: bool,
    /// Resolved schema as a JSON schema fragment.
    pub schema: serde_json::Value,
}

/// Discovery output: every discovered stream, sorted by stream name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Discovered streams in stream-name order.
    pub streams: Vec<CollectionDescriptor>,
}

impl Catalog {
    /// Look up a stream by name.
    pub fn stream(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.streams.iter().find(|d| d.stream == name)
    }

    /// Iterate over the streams marked for extraction.
    pub fn selected(&self) -> impl Iterator<Item = &CollectionDescriptor> {
        self.streams.iter().filter(|d| d.selected)
    }

    /// Mark every stream for extraction.
    pub fn select_all(&mut self) {
        for descriptor in &mut self.streams {
            descriptor.selected = true;
        }
    }
}

/// Databases the tap never discovers unless explicitly included.
const INTERNAL_DATABASES: &[&str] = &["admin", "config", "local"];

/// Database admission rules for discovery.
///
/// A non-empty include list admits exactly the listed databases. With
/// no include list, everything except excluded and internal databases
/// is admitted. Supplying both lists is a configuration error.
#[derive(Debug, Clone, Default)]
pub struct DatabaseFilter {
    /// Databases to discover; empty means all.
    pub include: Vec<String>,
    /// Databases to leave out when no include list is given.
    pub exclude: Vec<String>,
}

impl DatabaseFilter {
    /// Reject contradictory filter configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err(ConfigError::ConflictingFilter);
        }
        Ok(())
    }

    /// Whether discovery should walk this database.
    pub fn admits(&self, database: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|db| db == database);
        }
        if self.exclude.iter().any(|db| db == database) {
            return false;
        }
        !INTERNAL_DATABASES.contains(&database)
    }
}

/// Per-stream replication settings supplied from outside discovery,
/// typically a previously saved catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationOverride {
    /// Replication method to use instead of the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_method: Option<ReplicationMethod>,
    /// Replication key to order incremental reads by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Whether the stream is selected for extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

/// Turn a database name into its stream-name form.
///
/// Hyphens and dots collide with downstream naming rules and become
/// underscores.
pub fn sanitize_database_name(database: &str) -> String {
    database.replace(['-', '.'], "_")
}

/// Derive the stream name for a collection.
pub fn stream_name(prefix: &str, database: &str, collection: &str) -> String {
    format!("{prefix}{}_{collection}", sanitize_database_name(database))
}

/// Discover collections and build the catalog.
///
/// Validates the filter and mode before touching the source. Databases
/// and collections that deny access are skipped with a debug log; any
/// other source fault aborts discovery. Output is sorted by stream name
/// so repeated discovery runs diff cleanly.
pub async fn build_catalog(
    source: &dyn DocumentSource,
    filter: &DatabaseFilter,
    stream_prefix: &str,
    mode: &SchemaMode,
    overrides: &BTreeMap<String, ReplicationOverride>,
) -> Result<Catalog, CatalogError> {
    filter.validate()?;
    if matches!(mode, SchemaMode::Infer { max_docs: 0 }) {
        return Err(ConfigError::InvalidSampleSize.into());
    }

    let databases = source
        .list_databases()
        .await
        .map_err(|cause| CatalogError::Source {
            context: "listing databases".to_string(),
            cause,
        })?;

    let mut streams = Vec::new();
    for database in databases {
        if !filter.admits(&database) {
            tracing::debug!("Database {database} filtered out of discovery");
            continue;
        }

        let collections = match source.list_collections(&database).await {
            Ok(collections) => collections,
            Err(SourceError::AccessDenied(reason)) => {
                tracing::debug!("Skipping database {database}: {reason}");
                continue;
            }
            Err(cause) => {
                return Err(CatalogError::Source {
                    context: format!("listing collections in {database}"),
                    cause,
                })
            }
        };

        for collection in collections {
            let descriptor = match resolve_schema(source, &database, &collection, mode).await {
                Ok(descriptor) => descriptor,
                Err(SourceError::AccessDenied(reason)) => {
                    tracing::debug!("Skipping collection {database}.{collection}: {reason}");
                    continue;
                }
                Err(cause) => {
                    return Err(CatalogError::Source {
                        context: format!("sampling {database}.{collection}"),
                        cause,
                    })
                }
            };

            let stream = stream_name(stream_prefix, &database, &collection);
            let over = overrides.get(&stream);
            streams.push(CollectionDescriptor {
                database: database.clone(),
                collection,
                stream,
                replication_method: over
                    .and_then(|o| o.replication_method)
                    .unwrap_or_default(),
                replication_key: over.and_then(|o| o.replication_key.clone()),
                selected: over.and_then(|o| o.selected).unwrap_or(false),
                schema: descriptor.to_json(),
            });
        }
    }

    streams.sort_by(|a, b| a.stream.cmp(&b.stream));
    tracing::info!("Discovered {} streams", streams.len());
    Ok(Catalog { streams })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CollectionQuery, DocumentCursor};
    use crate::testing::{document, MemorySource};
    use crate::values::{Document, PortableValue};
    use serde_json::json;

    /// Source double that fails the test on any call, to prove a code
    /// path does no I/O.
    struct UntouchableSource;

    #[async_trait::async_trait]
    impl DocumentSource for UntouchableSource {
        async fn list_databases(&self) -> Result<Vec<String>, SourceError> {
            panic!("discovery touched the source")
        }

        async fn list_collections(&self, _database: &str) -> Result<Vec<String>, SourceError> {
            panic!("discovery touched the source")
        }

        async fn sample(
            &self,
            _database: &str,
            _collection: &str,
            _size: u32,
        ) -> Result<Vec<Document>, SourceError> {
            panic!("discovery touched the source")
        }

        async fn open_cursor(
            &self,
            _query: &CollectionQuery,
        ) -> Result<Box<dyn DocumentCursor>, SourceError> {
            panic!("discovery touched the source")
        }
    }

    fn sample_doc() -> Document {
        document([
            ("_id", PortableValue::String("a".to_string())),
            ("n", PortableValue::Int(1)),
        ])
    }

    #[tokio::test]
    async fn test_conflicting_filter_rejected_before_io() {
        let filter = DatabaseFilter {
            include: vec!["db1".to_string()],
            exclude: vec!["db2".to_string()],
        };

        let result = build_catalog(
            &UntouchableSource,
            &filter,
            "",
            &SchemaMode::Permissive,
            &BTreeMap::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(CatalogError::Config(ConfigError::ConflictingFilter))
        ));
    }

    #[tokio::test]
    async fn test_zero_sample_size_rejected_before_io() {
        let result = build_catalog(
            &UntouchableSource,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Infer { max_docs: 0 },
            &BTreeMap::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(CatalogError::Config(ConfigError::InvalidSampleSize))
        ));
    }

    #[test]
    fn test_filter_admission_rules() {
        let all = DatabaseFilter::default();
        assert!(all.admits("mydb"));
        assert!(!all.admits("admin"));
        assert!(!all.admits("config"));
        assert!(!all.admits("local"));

        let include = DatabaseFilter {
            include: vec!["admin".to_string(), "mydb".to_string()],
            exclude: vec![],
        };
        assert!(include.admits("admin"));
        assert!(include.admits("mydb"));
        assert!(!include.admits("otherdb"));

        let exclude = DatabaseFilter {
            include: vec![],
            exclude: vec!["noisy".to_string()],
        };
        assert!(!exclude.admits("noisy"));
        assert!(exclude.admits("mydb"));
    }

    #[tokio::test]
    async fn test_stream_naming_sanitizes_database() {
        let source = MemorySource::new().with_collection("my-db.prod", "orders", vec![sample_doc()]);

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "tap_",
            &SchemaMode::Permissive,
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(catalog.streams.len(), 1);
        assert_eq!(catalog.streams[0].stream, "tap_my_db_prod_orders");
        assert_eq!(catalog.streams[0].database, "my-db.prod");
        assert_eq!(catalog.streams[0].collection, "orders");
    }

    #[tokio::test]
    async fn test_catalog_sorted_by_stream_name() {
        let source = MemorySource::new()
            .with_collection("zeta", "c", vec![sample_doc()])
            .with_collection("alpha", "c", vec![sample_doc()])
            .with_collection("alpha", "b", vec![sample_doc()]);

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Permissive,
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        let names: Vec<&str> = catalog.streams.iter().map(|d| d.stream.as_str()).collect();
        assert_eq!(names, vec!["alpha_b", "alpha_c", "zeta_c"]);
    }

    #[tokio::test]
    async fn test_defaults_are_full_table_unselected() {
        let source = MemorySource::new().with_collection("db", "c", vec![sample_doc()]);

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Permissive,
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        let descriptor = &catalog.streams[0];
        assert_eq!(descriptor.replication_method, ReplicationMethod::FullTable);
        assert_eq!(descriptor.replication_key, None);
        assert!(!descriptor.selected);
    }

    #[tokio::test]
    async fn test_overrides_apply_by_stream_name() {
        let source = MemorySource::new()
            .with_collection("db", "orders", vec![sample_doc()])
            .with_collection("db", "logs", vec![sample_doc()]);

        let mut overrides = BTreeMap::new();
        overrides.insert(
            "db_orders".to_string(),
            ReplicationOverride {
                replication_method: Some(ReplicationMethod::Incremental),
                replication_key: Some("updated_at".to_string()),
                selected: Some(true),
            },
        );

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Permissive,
            &overrides,
        )
        .await
        .unwrap();

        let orders = catalog.stream("db_orders").unwrap();
        assert_eq!(orders.replication_method, ReplicationMethod::Incremental);
        assert_eq!(orders.replication_key.as_deref(), Some("updated_at"));
        assert!(orders.selected);

        let logs = catalog.stream("db_logs").unwrap();
        assert_eq!(logs.replication_method, ReplicationMethod::FullTable);
        assert!(!logs.selected);
    }

    #[tokio::test]
    async fn test_denied_database_skipped() {
        let source = MemorySource::new()
            .with_collection("open", "c", vec![sample_doc()])
            .with_collection("locked", "c", vec![sample_doc()])
            .deny_database("locked");

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Permissive,
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(catalog.streams.len(), 1);
        assert_eq!(catalog.streams[0].stream, "open_c");
    }

    #[tokio::test]
    async fn test_denied_collection_skipped_under_inference() {
        let source = MemorySource::new()
            .with_collection("db", "open", vec![sample_doc()])
            .with_collection("db", "locked", vec![sample_doc()])
            .deny_collection("db", "locked");

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Infer { max_docs: 10 },
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(catalog.streams.len(), 1);
        assert_eq!(catalog.streams[0].stream, "db_open");
    }

    #[tokio::test]
    async fn test_inferred_schema_lands_in_descriptor() {
        let source = MemorySource::new().with_collection("db", "c", vec![sample_doc()]);

        let catalog = build_catalog(
            &source,
            &DatabaseFilter::default(),
            "",
            &SchemaMode::Infer { max_docs: 10 },
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        let schema = &catalog.streams[0].schema;
        assert_eq!(schema["properties"]["n"], json!({"type": "integer"}));
        assert_eq!(schema["properties"]["_id"], json!({"type": "string"}));
    }

    #[test]
    fn test_catalog_roundtrips_through_json() {
        let catalog = Catalog {
            streams: vec![CollectionDescriptor {
                database: "db".to_string(),
                collection: "c".to_string(),
                stream: "db_c".to_string(),
                replication_method: ReplicationMethod::Incremental,
                replication_key: Some("updated_at".to_string()),
                selected: true,
                schema: json!({"type": "object"}),
            }],
        };

        let json = serde_json::to_string_pretty(&catalog).unwrap();
        assert!(json.contains("\"INCREMENTAL\""));

        let loaded: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, catalog);
    }

    #[test]
    fn test_select_all() {
        let mut catalog = Catalog {
            streams: vec![CollectionDescriptor {
                database: "db".to_string(),
                collection: "c".to_string(),
                stream: "db_c".to_string(),
                replication_method: ReplicationMethod::FullTable,
                replication_key: None,
                selected: false,
                schema: json!({}),
            }],
        };
        assert_eq!(catalog.selected().count(), 0);
        catalog.select_all();
        assert_eq!(catalog.selected().count(), 1);
    }
}
