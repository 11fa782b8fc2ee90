//! Configuration loading.
//!
//! Settings come from a JSON file (`--config`), overridden field by field
//! by command-line flags, with the connection URI also accepted from the
//! `MONGO_TAP_URI` environment variable. Everything that can be rejected
//! without a connection is rejected here, before any connection is made.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use tap_core::catalog::{DatabaseFilter, ReplicationOverride};
use tap_core::extract::{ExtractOptions, KeyPolicy};
use tap_core::schema::SchemaMode;

/// Configuration flags shared by every subcommand.
#[derive(Parser, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Path to a JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// MongoDB connection string
    #[arg(long, env = "MONGO_TAP_URI")]
    pub uri: Option<String>,

    /// Database to discover (repeatable); default is every non-internal database
    #[arg(long = "include-database", value_name = "DB")]
    pub include_databases: Vec<String>,

    /// Database to skip (repeatable); mutually exclusive with includes
    #[arg(long = "exclude-database", value_name = "DB")]
    pub exclude_databases: Vec<String>,

    /// Prefix prepended to every stream name
    #[arg(long)]
    pub stream_prefix: Option<String>,

    /// Infer schemas from a document sample instead of permissive schemas
    #[arg(long)]
    pub infer_schema: bool,

    /// Documents sampled per collection when inferring
    #[arg(long)]
    pub infer_schema_max_docs: Option<u32>,

    /// Skip documents with a missing or unorderable replication key
    /// instead of aborting their stream
    #[arg(long)]
    pub optional_replication_key: bool,

    /// Documents requested per cursor batch
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Emitted records between state messages
    #[arg(long)]
    pub state_interval: Option<u64>,
}

/// Resolved tap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    /// MongoDB connection string.
    #[serde(default)]
    pub uri: String,

    /// Databases to discover; empty means every non-internal database.
    #[serde(default)]
    pub database_includes: Vec<String>,

    /// Databases to skip when no include list is given.
    #[serde(default)]
    pub database_excludes: Vec<String>,

    /// Prefix prepended to every stream name.
    #[serde(default)]
    pub stream_prefix: String,

    /// Infer schemas from a document sample instead of permissive schemas.
    #[serde(default)]
    pub infer_schema: bool,

    /// Documents sampled per collection when inferring.
    #[serde(default = "default_sample_size")]
    pub infer_schema_max_docs: u32,

    /// Skip documents with a missing or unorderable replication key
    /// instead of aborting their stream.
    #[serde(default)]
    pub optional_replication_key: bool,

    /// Documents requested per cursor batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Emitted records between state messages.
    #[serde(default = "default_state_interval")]
    pub state_interval: u64,

    /// Per-stream replication settings keyed by stream name.
    #[serde(default)]
    pub overrides: BTreeMap<String, ReplicationOverride>,
}

fn default_sample_size() -> u32 {
    SchemaMode::DEFAULT_SAMPLE_SIZE
}

fn default_batch_size() -> u32 {
    1000
}

fn default_state_interval() -> u64 {
    1000
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            database_includes: Vec::new(),
            database_excludes: Vec::new(),
            stream_prefix: String::new(),
            infer_schema: false,
            infer_schema_max_docs: default_sample_size(),
            optional_replication_key: false,
            batch_size: default_batch_size(),
            state_interval: default_state_interval(),
            overrides: BTreeMap::new(),
        }
    }
}

impl TapConfig {
    /// Load configuration from the file named in `args` (if any) and
    /// apply the flag overrides, then validate.
    pub fn load(args: &ConfigArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &ConfigArgs) {
        if let Some(uri) = &args.uri {
            self.uri = uri.clone();
        }
        if !args.include_databases.is_empty() {
            self.database_includes = args.include_databases.clone();
        }
        if !args.exclude_databases.is_empty() {
            self.database_excludes = args.exclude_databases.clone();
        }
        if let Some(prefix) = &args.stream_prefix {
            self.stream_prefix = prefix.clone();
        }
        if args.infer_schema {
            self.infer_schema = true;
        }
        if let Some(max_docs) = args.infer_schema_max_docs {
            self.infer_schema_max_docs = max_docs;
        }
        if args.optional_replication_key {
            self.optional_replication_key = true;
        }
        if let Some(batch_size) = args.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(interval) = args.state_interval {
            self.state_interval = interval;
        }
    }

    /// Reject configurations that could only fail later.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.uri.is_empty() {
            anyhow::bail!(
                "a MongoDB connection URI is required (--uri, MONGO_TAP_URI, or \"uri\" in the config file)"
            );
        }
        self.filter().validate()?;
        if self.infer_schema && self.infer_schema_max_docs == 0 {
            anyhow::bail!("infer_schema_max_docs must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        Ok(())
    }

    /// Database admission filter for discovery.
    pub fn filter(&self) -> DatabaseFilter {
        DatabaseFilter {
            include: self.database_includes.clone(),
            exclude: self.database_excludes.clone(),
        }
    }

    /// Schema resolution mode for discovery.
    pub fn schema_mode(&self) -> SchemaMode {
        if self.infer_schema {
            SchemaMode::Infer {
                max_docs: self.infer_schema_max_docs,
            }
        } else {
            SchemaMode::Permissive
        }
    }

    /// Replication key policy for extraction.
    pub fn key_policy(&self) -> KeyPolicy {
        if self.optional_replication_key {
            KeyPolicy::Resilient
        } else {
            KeyPolicy::Strict
        }
    }

    /// Tunables for the extraction loop.
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            key_policy: self.key_policy(),
            batch_size: self.batch_size,
            state_interval: self.state_interval,
        }
    }
}
