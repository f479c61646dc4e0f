//! # Document Shapes
//!
//! A shape is the declarative description of a document: its name, its typed
//! accessors, its declared parents, and an optional registry id override.
//!
//! Shapes are declared explicitly at startup rather than discovered by
//! runtime introspection. The declaration order of parents matters: the
//! specialized supertype is declared first, capability parents after it, and
//! ancestor resolution walks them in exactly that order.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The declared type of a single accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Boolean,
    /// A nested document of the given shape.
    Document(DocumentType),
    /// An optional wrapper: the field may be absent.
    Optional(Box<FieldType>),
}

impl FieldType {
    /// Convenience constructor for an optional field type.
    #[must_use]
    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    /// Tests if this is the optional wrapper.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_))
    }

    /// A short description of the expected kind, used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Document(ty) => format!("document {}", ty.name()),
            FieldType::Optional(inner) => format!("optional {}", inner.describe()),
        }
    }
}

/// One declared accessor: a field name and its declared type.
#[derive(Debug, Clone)]
pub(crate) struct Accessor {
    pub(crate) name: String,
    pub(crate) ty: FieldType,
}

struct ShapeInner {
    /// The shape's simple name, e.g. `OrderPlaced`.
    name: String,
    /// Custom registry id, overriding the default (the simple name).
    registry_id: Option<String>,
    /// Declared parents: specialized supertype first, then capability parents.
    parents: Vec<DocumentType>,
    /// Declared accessors, in declaration order.
    accessors: Vec<Accessor>,
}

/// A handle to a declared document shape.
///
/// Cheap to clone; equality and hashing are by shape name, which must be
/// unique within a process.
#[derive(Clone)]
pub struct DocumentType {
    inner: Arc<ShapeInner>,
}

impl DocumentType {
    /// Starts declaring a new shape with the given simple name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DocumentTypeBuilder {
        DocumentTypeBuilder {
            name: name.into(),
            registry_id: None,
            parents: Vec::new(),
            accessors: Vec::new(),
        }
    }

    /// Gets the shape's simple name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the custom registry id, if one was declared.
    #[must_use]
    pub fn registry_id(&self) -> Option<&str> {
        self.inner.registry_id.as_deref()
    }

    /// Gets the declared parents, in declaration order.
    #[must_use]
    pub fn parents(&self) -> &[DocumentType] {
        &self.inner.parents
    }

    pub(crate) fn accessors(&self) -> &[Accessor] {
        &self.inner.accessors
    }
}

impl PartialEq for DocumentType {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Eq for DocumentType {}

impl Hash for DocumentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
    }
}

impl fmt::Debug for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentType")
            .field("name", &self.inner.name)
            .finish()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

/// Builder for [`DocumentType`].
pub struct DocumentTypeBuilder {
    name: String,
    registry_id: Option<String>,
    parents: Vec<DocumentType>,
    accessors: Vec<Accessor>,
}

impl DocumentTypeBuilder {
    /// Declares a custom registry id for this shape, overriding the default
    /// (the shape's simple name).
    #[must_use]
    pub fn registry_id(mut self, id: impl Into<String>) -> Self {
        self.registry_id = Some(id.into());
        self
    }

    /// Declares a parent shape.
    ///
    /// Parents are walked in declaration order during ancestor resolution
    /// and schema inheritance; declare the specialized supertype before any
    /// capability parents.
    #[must_use]
    pub fn parent(mut self, parent: &DocumentType) -> Self {
        self.parents.push(parent.clone());
        self
    }

    /// Declares an accessor: a field name and its declared type.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.accessors.push(Accessor {
            name: name.into(),
            ty,
        });
        self
    }

    /// Declares an optional accessor; shorthand for wrapping `ty` in
    /// [`FieldType::Optional`].
    #[must_use]
    pub fn optional(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(name, FieldType::optional(ty))
    }

    /// Finishes the declaration.
    #[must_use]
    pub fn build(self) -> DocumentType {
        DocumentType {
            inner: Arc::new(ShapeInner {
                name: self.name,
                registry_id: self.registry_id,
                parents: self.parents,
                accessors: self.accessors,
            }),
        }
    }
}
