//! mongo-tap library surface.
//!
//! The binary stays thin: discovery, schema resolution, the extraction
//! loop and bookmark management live in the workspace crates
//! (`tap-core`, `bookmark`, `mongodb-types`, `mongodb-source`). This
//! crate adds only the outer layers those leave open, configuration
//! loading ([`config`]) and the stdout JSONL message sink ([`output`]).

pub mod config;
pub mod output;

pub use config::{ConfigArgs, TapConfig};
pub use output::JsonlSink;
