//! Portable document values.
//!
//! This module defines the driver-agnostic value tree every other stage
//! of the tap operates on. Driver scalars are coerced into this closed
//! variant set once, at the source boundary, so schema inference,
//! bookmark extraction and record emission never see driver types.

use bookmark::Bookmark;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// A single document value in portable form.
///
/// `PortableValue` is what a driver-specific value becomes after
/// coercion: identifiers and decimals arrive as strings, timestamps as
/// UTC date-times, binary payloads as base64 text with their subtype
/// tag preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum PortableValue {
    /// Null or explicitly undefined value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer (also holds coerced 32-bit integers)
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// String value (also holds coerced identifiers and decimals)
    String(String),

    /// Date/time, normalized to UTC
    DateTime(DateTime<Utc>),

    /// Binary payload, base64-encoded, with its original subtype tag
    Binary {
        /// Base64 encoding of the raw bytes
        data: String,
        /// Driver subtype tag recorded at coercion time
        subtype: u8,
    },

    /// Array of values
    Array(Vec<PortableValue>),

    /// Nested document
    Object(HashMap<String, PortableValue>),
}

/// A full document: the root key to value mapping handed over by a
/// source cursor.
pub type Document = HashMap<String, PortableValue>;

impl PortableValue {
    /// The kind of this value, used for schema inference.
    pub fn kind(&self) -> PortableKind {
        match self {
            PortableValue::Null => PortableKind::Null,
            PortableValue::Bool(_) => PortableKind::Boolean,
            PortableValue::Int(_) => PortableKind::Integer,
            PortableValue::Float(_) => PortableKind::Number,
            PortableValue::String(_) => PortableKind::String,
            PortableValue::DateTime(_) => PortableKind::DateTime,
            PortableValue::Binary { .. } => PortableKind::Binary,
            PortableValue::Array(_) => PortableKind::Array,
            PortableValue::Object(_) => PortableKind::Object,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a date-time.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Try to turn this value into a bookmark candidate.
    ///
    /// Only integers, date-times and strings have a defined bookmark
    /// ordering; everything else returns `None` and is handled by the
    /// replication key policy.
    pub fn as_bookmark(&self) -> Option<Bookmark> {
        match self {
            Self::Int(i) => Some(Bookmark::Integer(*i)),
            Self::DateTime(dt) => Some(Bookmark::DateTime(*dt)),
            Self::String(s) => Some(Bookmark::String(s.clone())),
            _ => None,
        }
    }

    /// Render this value as JSON for record emission.
    ///
    /// Date-times become RFC 3339 strings with millisecond precision,
    /// binary payloads their base64 text. Non-finite floats have no
    /// JSON representation and become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PortableValue::Null => serde_json::Value::Null,
            PortableValue::Bool(b) => serde_json::Value::Bool(*b),
            PortableValue::Int(i) => serde_json::Value::from(*i),
            PortableValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PortableValue::String(s) => serde_json::Value::String(s.clone()),
            PortableValue::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            PortableValue::Binary { data, .. } => serde_json::Value::String(data.clone()),
            PortableValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(PortableValue::to_json).collect())
            }
            PortableValue::Object(fields) => document_to_json(fields),
        }
    }
}

/// Render a document as a JSON object.
///
/// Keys are emitted in sorted order so identical documents always
/// serialize identically.
pub fn document_to_json(document: &Document) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = document
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();
    serde_json::Value::Object(map)
}

/// The kind of a portable value, as seen by schema inference.
///
/// Kinds order by declaration so sets of kinds render deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortableKind {
    /// Null value
    Null,
    /// Boolean value
    Boolean,
    /// Integer number
    Integer,
    /// Floating point number
    Number,
    /// String value
    String,
    /// Date/time value
    DateTime,
    /// Binary payload
    Binary,
    /// Array of values
    Array,
    /// Nested document
    Object,
}
