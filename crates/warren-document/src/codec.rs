//! # Document Codec
//!
//! Schema-directed (de)serialization of document values. The codec walks
//! [`SchemaMeta`] field metadata, so it never needs per-shape code, and
//! delegates the wire grammar to JSON: one object per document, keyed by
//! field name.
//!
//! Optional fields serialize by presence or absence of the wrapped value,
//! never as an encoded wrapper. Unknown keys in inbound payloads are
//! ignored, so adding fields on the producer side does not break older
//! consumers.

use crate::schema::{SchemaMeta, SchemaRegistry};
use crate::shape::{DocumentType, FieldType};
use crate::value::{DocumentValue, Value};
use std::sync::Arc;
use thiserror::Error;

/// Errors from encoding a document value.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A stored value contradicts the declared field type.
    #[error("Field '{path}' holds {found}, declared {expected}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A float field holds a non-finite value, which JSON cannot carry.
    #[error("Field '{path}' holds a non-finite float")]
    NonFiniteFloat { path: String },

    /// The JSON writer failed.
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from decoding a payload into a document value.
///
/// Each variant carries the dotted path of the offending field.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not parseable JSON.
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A document node is not a JSON object.
    #[error("Field '{path}' is not an object, found {found}")]
    NotAnObject { path: String, found: &'static str },

    /// A required field is missing or null.
    #[error("Field '{path}' is required but missing")]
    MissingField { path: String },

    /// A field's JSON node contradicts the declared field type.
    #[error("Field '{path}' expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: &'static str,
    },
}

/// Serializes and deserializes document values by walking their schemas.
#[derive(Clone)]
pub struct DocumentCodec {
    schemas: Arc<SchemaRegistry>,
}

impl DocumentCodec {
    /// Creates a codec over the given schema registry.
    #[must_use]
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self { schemas }
    }

    /// Gets the schema registry backing this codec.
    #[must_use]
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Encodes `value` against the declared shape `ty`.
    ///
    /// Absent optional fields are omitted from the wire object; a required
    /// field with no stored value is written as JSON null, matching the
    /// accessor contract (reading an unset field yields absent).
    pub fn encode(&self, value: &DocumentValue, ty: &DocumentType) -> Result<Vec<u8>, EncodeError> {
        let schema = self.schemas.schema_of(ty);
        let object = self.encode_object(value, &schema, "")?;
        Ok(serde_json::to_vec(&serde_json::Value::Object(object))?)
    }

    /// Decodes `bytes` into a value of shape `ty`.
    ///
    /// Required fields that are missing or null, and nodes whose kind
    /// contradicts the declared field type, fail with a [`DecodeError`]
    /// carrying the dotted field path. Unknown keys are ignored.
    pub fn decode(&self, ty: &DocumentType, bytes: &[u8]) -> Result<DocumentValue, DecodeError> {
        let root: serde_json::Value = serde_json::from_slice(bytes)?;
        self.decode_object(ty, &root, "")
    }

    fn encode_object(
        &self,
        value: &DocumentValue,
        schema: &SchemaMeta,
        path: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, EncodeError> {
        let mut object = serde_json::Map::new();
        for descriptor in schema.fields().values() {
            let field_path = join(path, descriptor.name());
            match value.get(descriptor.name()) {
                Some(stored) => {
                    let node = self.encode_field(stored, descriptor.ty(), &field_path)?;
                    object.insert(descriptor.name().to_string(), node);
                }
                None if descriptor.is_optional() => {}
                None => {
                    object.insert(descriptor.name().to_string(), serde_json::Value::Null);
                }
            }
        }
        Ok(object)
    }

    fn encode_field(
        &self,
        stored: &Value,
        ty: &FieldType,
        path: &str,
    ) -> Result<serde_json::Value, EncodeError> {
        match (ty, stored) {
            (FieldType::String, Value::String(s)) => Ok(serde_json::Value::String(s.clone())),
            (FieldType::Integer, Value::Integer(i)) => Ok(serde_json::Value::from(*i)),
            (FieldType::Float, Value::Float(x)) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .ok_or_else(|| EncodeError::NonFiniteFloat {
                    path: path.to_string(),
                }),
            (FieldType::Boolean, Value::Boolean(b)) => Ok(serde_json::Value::Bool(*b)),
            (FieldType::Document(nested_ty), Value::Document(nested)) => {
                let schema = self.schemas.schema_of(nested_ty);
                Ok(serde_json::Value::Object(self.encode_object(
                    nested, &schema, path,
                )?))
            }
            // presence was decided by the caller; encode the wrapped type
            (FieldType::Optional(inner), stored) => self.encode_field(stored, inner, path),
            (declared, stored) => Err(EncodeError::TypeMismatch {
                path: path.to_string(),
                expected: declared.describe(),
                found: stored.kind().to_string(),
            }),
        }
    }

    fn decode_object(
        &self,
        ty: &DocumentType,
        node: &serde_json::Value,
        path: &str,
    ) -> Result<DocumentValue, DecodeError> {
        let object = node.as_object().ok_or_else(|| DecodeError::NotAnObject {
            path: if path.is_empty() {
                "<root>".to_string()
            } else {
                path.to_string()
            },
            found: json_kind(node),
        })?;

        let schema = self.schemas.schema_of(ty);
        let mut builder = DocumentValue::builder(ty);
        for descriptor in schema.fields().values() {
            let field_path = join(path, descriptor.name());
            match object.get(descriptor.name()) {
                None | Some(serde_json::Value::Null) => {
                    if !descriptor.is_optional() {
                        return Err(DecodeError::MissingField { path: field_path });
                    }
                    // absent optional: leave the bag entry out
                }
                Some(node) => {
                    let value = self.decode_field(descriptor.ty(), node, &field_path)?;
                    builder = builder.set(descriptor.name(), value);
                }
            }
        }
        Ok(builder.build())
    }

    fn decode_field(
        &self,
        ty: &FieldType,
        node: &serde_json::Value,
        path: &str,
    ) -> Result<Value, DecodeError> {
        let mismatch = || DecodeError::TypeMismatch {
            path: path.to_string(),
            expected: ty.describe(),
            found: json_kind(node),
        };
        match ty {
            FieldType::String => node
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            FieldType::Integer => node.as_i64().map(Value::Integer).ok_or_else(mismatch),
            FieldType::Float => node.as_f64().map(Value::Float).ok_or_else(mismatch),
            FieldType::Boolean => node.as_bool().map(Value::Boolean).ok_or_else(mismatch),
            FieldType::Document(nested_ty) => self
                .decode_object(nested_ty, node, path)
                .map(Value::Document),
            // presence was decided by the caller; decode the wrapped type
            FieldType::Optional(inner) => self.decode_field(inner, node, path),
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn json_kind(node: &serde_json::Value) -> &'static str {
    match node {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
