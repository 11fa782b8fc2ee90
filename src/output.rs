//! Singer-style JSONL output.
//!
//! Three message kinds, one JSON object per line: `SCHEMA` announcing a
//! stream before its records, `RECORD` per emitted document, `STATE`
//! carrying the bookmark map. The writer is flushed on every state
//! message, so a consumer persisting state never observes it ahead of
//! the records that justify it.

use std::io::Write;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use bookmark::SyncState;
use tap_core::catalog::CollectionDescriptor;
use tap_core::sink::RecordSink;
use tap_core::values::{document_to_json, Document};

/// Record sink writing JSONL messages to any writer.
pub struct JsonlSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consume the sink, handing back the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, message: &serde_json::Value) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl JsonlSink<std::io::Stdout> {
    /// Sink writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for JsonlSink<W> {
    async fn write_schema(&mut self, stream: &CollectionDescriptor) -> anyhow::Result<()> {
        let mut message = json!({
            "type": "SCHEMA",
            "stream": stream.stream,
            "schema": stream.schema,
            "key_properties": ["_id"],
        });
        if let Some(key) = &stream.replication_key {
            message["bookmark_properties"] = json!([key]);
        }
        self.write_line(&message).context("writing SCHEMA message")
    }

    async fn write_record(&mut self, stream: &str, document: &Document) -> anyhow::Result<()> {
        let message = json!({
            "type": "RECORD",
            "stream": stream,
            "record": document_to_json(document),
            "time_extracted": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        self.write_line(&message).context("writing RECORD message")
    }

    async fn write_state(&mut self, state: &SyncState) -> anyhow::Result<()> {
        let message = json!({
            "type": "STATE",
            "value": state,
        });
        self.write_line(&message).context("writing STATE message")?;
        self.writer.flush().context("flushing after STATE message")
    }
}
