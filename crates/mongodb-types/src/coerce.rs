//! BSON to portable value coercion.
//!
//! MongoDB documents come off the wire as [`bson::Document`]. Downstream
//! consumers only understand the portable type system, so every BSON value is
//! mapped onto a [`PortableValue`] here. Identifier-like types (ObjectId,
//! Decimal128) become strings so they survive JSON serialization without
//! precision loss, temporal types become UTC datetimes, and binary payloads
//! are base64-encoded. Types with no portable meaning (regular expressions,
//! JavaScript code, min/max keys) are rejected with the path that holds them.

use base64::{engine::general_purpose, Engine as _};
use bson::{Bson, Document};
use tap_core::values::{Document as PortableDocument, PortableValue};

/// A BSON value that cannot be represented in the portable type system.
///
/// `type_name` matches the MongoDB `$type` alias for the offending value and
/// `path` is the dotted location inside the document (array elements use
/// their index, e.g. `tags.1`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported BSON type {type_name} at {path}")]
pub struct CoerceError {
    pub type_name: &'static str,
    pub path: String,
}

impl CoerceError {
    fn new(type_name: &'static str, path: &str) -> Self {
        Self {
            type_name,
            path: path.to_string(),
        }
    }
}

/// Converts a full BSON document into a portable document.
///
/// Field order is not preserved; portable documents are unordered maps.
pub fn coerce_document(document: Document) -> Result<PortableDocument, CoerceError> {
    let mut fields = PortableDocument::with_capacity(document.len());
    for (name, value) in document {
        let coerced = coerce_value(value, &name)?;
        fields.insert(name, coerced);
    }
    Ok(fields)
}

/// Converts a single BSON value, reporting `path` on failure.
pub fn coerce_value(value: Bson, path: &str) -> Result<PortableValue, CoerceError> {
    match value {
        Bson::Null => Ok(PortableValue::Null),
        // Undefined is deprecated in MongoDB itself; treat it as null.
        Bson::Undefined => Ok(PortableValue::Null),
        Bson::Boolean(b) => Ok(PortableValue::Bool(b)),
        Bson::Int32(i) => Ok(PortableValue::Int(i64::from(i))),
        Bson::Int64(i) => Ok(PortableValue::Int(i)),
        Bson::Double(f) => Ok(PortableValue::Float(f)),
        Bson::String(s) => Ok(PortableValue::String(s)),
        Bson::ObjectId(oid) => Ok(PortableValue::String(oid.to_hex())),
        // Decimal128 exceeds f64 precision, so the decimal string is the only
        // lossless portable form.
        Bson::Decimal128(d) => Ok(PortableValue::String(d.to_string())),
        Bson::DateTime(dt) => Ok(PortableValue::DateTime(dt.to_chrono())),
        Bson::Timestamp(ts) => {
            // The time component is seconds since the Unix epoch; the
            // increment only disambiguates oplog entries within a second.
            chrono::DateTime::from_timestamp(i64::from(ts.time), 0)
                .map(PortableValue::DateTime)
                .ok_or_else(|| CoerceError::new("timestamp", path))
        }
        Bson::Binary(binary) => Ok(PortableValue::Binary {
            data: general_purpose::STANDARD.encode(&binary.bytes),
            subtype: u8::from(binary.subtype),
        }),
        Bson::Array(items) => {
            let mut coerced = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let item_path = format!("{path}.{index}");
                coerced.push(coerce_value(item, &item_path)?);
            }
            Ok(PortableValue::Array(coerced))
        }
        Bson::Document(doc) => {
            let mut fields = PortableDocument::with_capacity(doc.len());
            for (name, nested) in doc {
                let nested_path = format!("{path}.{name}");
                let coerced = coerce_value(nested, &nested_path)?;
                fields.insert(name, coerced);
            }
            Ok(PortableValue::Object(fields))
        }
        Bson::RegularExpression(_) => Err(CoerceError::new("regex", path)),
        Bson::JavaScriptCode(_) => Err(CoerceError::new("javascript", path)),
        Bson::JavaScriptCodeWithScope(_) => Err(CoerceError::new("javascriptWithScope", path)),
        Bson::Symbol(_) => Err(CoerceError::new("symbol", path)),
        Bson::MinKey => Err(CoerceError::new("minKey", path)),
        Bson::MaxKey => Err(CoerceError::new("maxKey", path)),
        Bson::DbPointer(_) => Err(CoerceError::new("dbPointer", path)),
    }
}
