//! Stream schema descriptors and sample-based inference.
//!
//! A stream's schema is either the fixed permissive descriptor (an open
//! object that says nothing beyond "a document") or one inferred by
//! folding a bounded sample of coerced documents into a merged shape.
//! Inference widens rather than rejects: a property observed with
//! several scalar kinds accepts all of them, and a property whose shape
//! class conflicts across documents (scalar vs array vs object) widens
//! to a permissive leaf.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::source::{DocumentSource, SourceError};
use crate::values::{Document, PortableKind, PortableValue};

/// How a stream's schema descriptor is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    /// Fixed permissive descriptor, no sampling I/O.
    Permissive,
    /// Inferred from up to `max_docs` sampled documents per collection.
    Infer {
        /// Sample size cap; must be at least 1.
        max_docs: u32,
    },
}

impl SchemaMode {
    /// Default sample size cap for inference.
    pub const DEFAULT_SAMPLE_SIZE: u32 = 2000;
}

impl Default for SchemaMode {
    fn default() -> Self {
        SchemaMode::Permissive
    }
}

/// Produce the schema descriptor for one collection.
///
/// Permissive mode returns immediately without touching the source.
/// Infer mode draws a sample through the source (order unspecified) and
/// folds it; an empty collection degrades to the permissive descriptor.
pub async fn resolve_schema(
    source: &dyn DocumentSource,
    database: &str,
    collection: &str,
    mode: &SchemaMode,
) -> Result<SchemaDescriptor, SourceError> {
    match mode {
        SchemaMode::Permissive => Ok(SchemaDescriptor::permissive()),
        SchemaMode::Infer { max_docs } => {
            let sample = source.sample(database, collection, *max_docs).await?;
            tracing::debug!(
                "Inferred schema for {database}.{collection} from {} sampled documents",
                sample.len()
            );
            Ok(SchemaDescriptor::infer(&sample))
        }
    }
}

/// The shape of a stream, or of one property path within it.
///
/// Descriptors form a merge lattice: folding documents into a running
/// descriptor only ever widens it. [`SchemaDescriptor::Any`] is the
/// widest point, the permissive leaf that accepts any shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDescriptor {
    /// Scalar kinds observed at this path.
    Scalar(BTreeSet<PortableKind>),

    /// Object with per-property descriptors.
    ///
    /// `open` marks the object as explicitly accepting undeclared
    /// properties; inferred objects leave it unset and rely on the
    /// schema consumer's default.
    Object {
        /// Descriptor per observed property name.
        properties: BTreeMap<String, SchemaDescriptor>,
        /// Whether undeclared properties are explicitly accepted.
        open: bool,
    },

    /// Array whose items match the inner descriptor.
    Array(Box<SchemaDescriptor>),

    /// Permissive leaf: any shape accepted.
    ///
    /// Produced when documents disagree on the shape class at a path,
    /// or when nothing was observed (an always-empty array).
    Any,
}

impl SchemaDescriptor {
    /// The fixed permissive stream descriptor.
    ///
    /// An open object declaring only the identifier field, which is
    /// always a string after coercion.
    pub fn permissive() -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("_id".to_string(), Self::scalar(PortableKind::String));
        SchemaDescriptor::Object {
            properties,
            open: true,
        }
    }

    fn scalar(kind: PortableKind) -> Self {
        SchemaDescriptor::Scalar(BTreeSet::from([kind]))
    }

    /// Describe a single value.
    pub fn of_value(value: &PortableValue) -> Self {
        match value {
            PortableValue::Object(fields) => Self::of_document(fields),
            PortableValue::Array(items) => {
                let inner = items
                    .iter()
                    .map(Self::of_value)
                    .reduce(Self::merge)
                    .unwrap_or(SchemaDescriptor::Any);
                SchemaDescriptor::Array(Box::new(inner))
            }
            scalar => Self::scalar(scalar.kind()),
        }
    }

    /// Describe a whole document as a closed object.
    pub fn of_document(document: &Document) -> Self {
        let properties = document
            .iter()
            .map(|(name, value)| (name.clone(), Self::of_value(value)))
            .collect();
        SchemaDescriptor::Object {
            properties,
            open: false,
        }
    }

    /// Merge two descriptors into one accepting everything either side
    /// accepts.
    ///
    /// Scalars union their kind sets; objects merge per property,
    /// keeping properties only one side observed as they are; arrays
    /// merge their item descriptors. Any other pairing disagrees on the
    /// shape class and widens to [`SchemaDescriptor::Any`].
    pub fn merge(self, other: SchemaDescriptor) -> SchemaDescriptor {
        use SchemaDescriptor::*;
        match (self, other) {
            (Any, _) | (_, Any) => Any,
            (Scalar(mut a), Scalar(b)) => {
                a.extend(b);
                Scalar(a)
            }
            (
                Object {
                    properties: mut a,
                    open: open_a,
                },
                Object {
                    properties: b,
                    open: open_b,
                },
            ) => {
                for (name, descriptor) in b {
                    let merged = match a.remove(&name) {
                        Some(existing) => existing.merge(descriptor),
                        None => descriptor,
                    };
                    a.insert(name, merged);
                }
                Object {
                    properties: a,
                    open: open_a || open_b,
                }
            }
            (Array(a), Array(b)) => Array(Box::new(a.merge(*b))),
            _ => Any,
        }
    }

    /// Infer a stream descriptor from a document sample.
    ///
    /// Folds every document's shape into one merged object and pins the
    /// identifier property to its post-coercion string form. An empty
    /// sample, or one where no document carried any field, degrades to
    /// the permissive descriptor.
    pub fn infer<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let merged = documents
            .into_iter()
            .map(Self::of_document)
            .reduce(Self::merge);

        match merged {
            Some(SchemaDescriptor::Object { mut properties, open }) if !properties.is_empty() => {
                properties.insert("_id".to_string(), Self::scalar(PortableKind::String));
                SchemaDescriptor::Object { properties, open }
            }
            _ => Self::permissive(),
        }
    }

    /// Render this descriptor as a JSON schema fragment.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SchemaDescriptor::Any => json!({}),
            SchemaDescriptor::Scalar(kinds) => scalar_to_json(kinds),
            SchemaDescriptor::Object { properties, open } => {
                let mut schema = serde_json::Map::new();
                schema.insert("type".to_string(), json!("object"));
                if !properties.is_empty() {
                    let rendered: serde_json::Map<String, serde_json::Value> = properties
                        .iter()
                        .map(|(name, descriptor)| (name.clone(), descriptor.to_json()))
                        .collect();
                    schema.insert("properties".to_string(), serde_json::Value::Object(rendered));
                }
                if *open {
                    schema.insert("additionalProperties".to_string(), json!(true));
                }
                serde_json::Value::Object(schema)
            }
            SchemaDescriptor::Array(items) => json!({
                "type": "array",
                "items": items.to_json(),
            }),
        }
    }
}

fn scalar_to_json(kinds: &BTreeSet<PortableKind>) -> serde_json::Value {
    // Kind iteration order is declaration order, so the rendered type
    // list is deterministic; several kinds share the "string" JSON type
    // and collapse into one entry.
    let mut names: Vec<&'static str> = Vec::new();
    for kind in kinds {
        let name = match kind {
            PortableKind::Null => "null",
            PortableKind::Boolean => "boolean",
            PortableKind::Integer => "integer",
            PortableKind::Number => "number",
            PortableKind::String | PortableKind::DateTime | PortableKind::Binary => "string",
            PortableKind::Array => "array",
            PortableKind::Object => "object",
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut schema = serde_json::Map::new();
    match names.as_slice() {
        [] => {}
        [single] => {
            schema.insert("type".to_string(), json!(single));
        }
        many => {
            schema.insert("type".to_string(), json!(many));
        }
    }

    // The format annotation only holds when every non-null observation
    // was a date-time.
    let all_datetime = kinds.contains(&PortableKind::DateTime)
        && kinds
            .iter()
            .all(|k| matches!(k, PortableKind::Null | PortableKind::DateTime));
    if all_datetime {
        schema.insert("format".to_string(), json!("date-time"));
    }

    serde_json::Value::Object(schema)
}
