//! # Document Values
//!
//! A [`DocumentValue`] is a fully-resolved, immutable bag of `name -> value`
//! entries tagged with its shape. Reading any accessor name returns the
//! stored value, or absent if the bag lacks it; the `Display` rendering is
//! derived from the type name and the field map. This holds however the
//! value was produced, builder or codec.

use crate::shape::DocumentType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single stored field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text.
    String(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean.
    Boolean(bool),
    /// A nested document.
    Document(DocumentValue),
}

impl Value {
    /// Gets the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Gets the integer content, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Gets the float content, if this is a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Gets the boolean content, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Gets the nested document, if this is a document.
    #[must_use]
    pub fn as_document(&self) -> Option<&DocumentValue> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// A short description of the stored kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Document(_) => "document",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DocumentValue> for Value {
    fn from(d: DocumentValue) -> Self {
        Value::Document(d)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Document(d) => write!(f, "{d}"),
        }
    }
}

/// An immutable document instance: a field bag tagged with its shape.
///
/// Cloning is cheap; the field bag is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentValue {
    ty: DocumentType,
    fields: Arc<BTreeMap<String, Value>>,
}

impl DocumentValue {
    /// Starts building a value of the given shape.
    #[must_use]
    pub fn builder(ty: &DocumentType) -> DocumentValueBuilder {
        DocumentValueBuilder {
            ty: ty.clone(),
            fields: BTreeMap::new(),
        }
    }

    /// Gets the shape of this value.
    #[must_use]
    pub fn ty(&self) -> &DocumentType {
        &self.ty
    }

    /// Reads an accessor: the stored value for `name`, or `None` if the bag
    /// lacks it (unset required field or absent optional).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Gets all stored fields, keyed by name.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Gets the number of stored fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Tests if no fields are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for DocumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.ty.name())?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// Builder for [`DocumentValue`].
pub struct DocumentValueBuilder {
    ty: DocumentType,
    fields: BTreeMap<String, Value>,
}

impl DocumentValueBuilder {
    /// Stores a field value. Leaving an optional field unset makes it
    /// absent.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Finishes the value.
    #[must_use]
    pub fn build(self) -> DocumentValue {
        DocumentValue {
            ty: self.ty,
            fields: Arc::new(self.fields),
        }
    }
}
