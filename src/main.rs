//! Command-line interface for mongo-tap
//!
//! # Usage Examples
//!
//! ## Discovery
//! ```bash
//! # Write a catalog of everything the credential can see
//! mongo-tap discover \
//!   --uri mongodb://localhost:27017 \
//!   --catalog-out catalog.json
//!
//! # Inferred schemas, one database only
//! mongo-tap discover \
//!   --uri mongodb://localhost:27017 \
//!   --include-database mydb \
//!   --infer-schema --infer-schema-max-docs 500
//! ```
//!
//! ## Sync
//! ```bash
//! # Extract the streams selected in the catalog, resuming from state.json
//! mongo-tap sync \
//!   --uri mongodb://localhost:27017 \
//!   --catalog catalog.json \
//!   --state-path state.json > records.jsonl
//!
//! # No catalog: discover afresh and extract every stream
//! mongo-tap sync --config config.json
//! ```
//!
//! The connection string may also come from `MONGO_TAP_URI`, and
//! `RUST_LOG` controls log verbosity on stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use bookmark::{BookmarkManager, FilesystemStore, StateStore};
use mongo_tap::config::{ConfigArgs, TapConfig};
use mongo_tap::output::JsonlSink;
use mongodb_source::MongoSource;
use tap_core::catalog::{build_catalog, Catalog};
use tap_core::extract::{extract_catalog, validate_replication_keys};

#[derive(Parser)]
#[command(name = "mongo-tap")]
#[command(about = "Extract MongoDB collections as bookmarked JSONL record streams")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover databases and collections and write a catalog as JSON
    Discover {
        /// Configuration file and flag overrides
        #[command(flatten)]
        config: ConfigArgs,

        /// Write the catalog to this file instead of stdout
        #[arg(long)]
        catalog_out: Option<PathBuf>,
    },

    /// Extract selected streams as JSONL messages on stdout
    Sync {
        /// Configuration file and flag overrides
        #[command(flatten)]
        config: ConfigArgs,

        /// Catalog from a previous discovery; without one, every
        /// discovered stream is extracted
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// File bookmark state is loaded from and persisted to
        #[arg(long, default_value = "state.json")]
        state_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Discover {
            config,
            catalog_out,
        } => run_discover(config, catalog_out).await,
        Commands::Sync {
            config,
            catalog,
            state_path,
        } => run_sync(config, catalog, state_path).await,
    }
}

async fn run_discover(args: ConfigArgs, catalog_out: Option<PathBuf>) -> anyhow::Result<()> {
    let config = TapConfig::load(&args)?;

    let source = MongoSource::connect(&config.uri).await?;
    let catalog = build_catalog(
        &source,
        &config.filter(),
        &config.stream_prefix,
        &config.schema_mode(),
        &config.overrides,
    )
    .await?;

    let json = serde_json::to_string_pretty(&catalog)?;
    match catalog_out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("writing catalog to {}", path.display()))?;
            tracing::info!(
                "Wrote catalog with {} streams to {}",
                catalog.streams.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn run_sync(
    args: ConfigArgs,
    catalog_path: Option<PathBuf>,
    state_path: PathBuf,
) -> anyhow::Result<()> {
    let config = TapConfig::load(&args)?;

    // A catalog from disk is validated before any connection is made, so
    // a bad one never costs a round trip.
    let file_catalog = match &catalog_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            let catalog: Catalog = serde_json::from_str(&text)
                .with_context(|| format!("parsing catalog {}", path.display()))?;
            validate_replication_keys(&catalog, config.key_policy())?;
            Some(catalog)
        }
        None => None,
    };

    let store = FilesystemStore::new(&state_path);
    let state = store.load().await?.unwrap_or_default();
    if !state.is_empty() {
        tracing::info!("Resuming from state in {}", state_path.display());
    }
    let mut manager = BookmarkManager::load(state);

    let source = MongoSource::connect(&config.uri).await?;
    let catalog = match file_catalog {
        Some(catalog) => catalog,
        None => {
            let mut catalog = build_catalog(
                &source,
                &config.filter(),
                &config.stream_prefix,
                &config.schema_mode(),
                &config.overrides,
            )
            .await?;
            catalog.select_all();
            catalog
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        tracing::info!("Received interrupt signal (Ctrl+C), flushing state before exit");
        signal_cancel.cancel();
    });

    let mut sink = JsonlSink::stdout();
    let summary = extract_catalog(
        &source,
        &mut sink,
        &mut manager,
        &store,
        &catalog,
        &config.extract_options(),
        &cancel,
    )
    .await?;

    tracing::info!(
        "Sync finished: {} records emitted, {} documents skipped across {} streams",
        summary.total_emitted(),
        summary.total_skipped(),
        summary.reports.len()
    );
    if !summary.all_ok() {
        anyhow::bail!("{} stream(s) aborted; see log for details", summary.aborted.len());
    }
    Ok(())
}
