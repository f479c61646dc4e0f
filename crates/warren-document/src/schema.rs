//! # Schema Registry
//!
//! Extracts field metadata from document shapes and caches it for the
//! registry's lifetime. Computation has no error path: a shape with zero
//! accessors yields an empty, valid schema (marker payloads).

use crate::shape::{DocumentType, FieldType};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Metadata for a single document field.
///
/// The declared optional wrapper is resolved here: `ty` is always the
/// unwrapped type, and `optional` records whether the wrapper was present.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    ty: FieldType,
    optional: bool,
}

impl FieldDescriptor {
    fn new(name: &str, declared: &FieldType) -> Self {
        match declared {
            FieldType::Optional(inner) => Self {
                name: name.to_string(),
                ty: (**inner).clone(),
                optional: true,
            },
            other => Self {
                name: name.to_string(),
                ty: other.clone(),
                optional: false,
            },
        }
    }

    /// Gets the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the field type, with any optional wrapper removed.
    #[must_use]
    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    /// Tests if the field was declared with the optional wrapper.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// Field metadata for one document shape, computed once and immutable
/// thereafter.
#[derive(Debug)]
pub struct SchemaMeta {
    ty: DocumentType,
    fields: BTreeMap<String, FieldDescriptor>,
}

impl SchemaMeta {
    /// Gets the shape this schema describes.
    #[must_use]
    pub fn ty(&self) -> &DocumentType {
        &self.ty
    }

    /// Gets all field descriptors, keyed by field name.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldDescriptor> {
        &self.fields
    }

    /// Gets the descriptor for a single field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Gets the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Tests if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Computes and caches [`SchemaMeta`] per document shape.
///
/// Accessors are collected from the shape itself and from its declared
/// parents, preorder: the shape's own declarations win over inherited ones,
/// and earlier parents win over later ones.
#[derive(Default)]
pub struct SchemaRegistry {
    cache: RwLock<HashMap<DocumentType, Arc<SchemaMeta>>>,
}

impl SchemaRegistry {
    /// Creates an empty schema registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the schema for the given shape, computing it on first use.
    ///
    /// Concurrent first lookups may compute the schema redundantly; the
    /// result is identical, so the overlapping cache writes are harmless.
    #[must_use]
    pub fn schema_of(&self, ty: &DocumentType) -> Arc<SchemaMeta> {
        if let Ok(cache) = self.cache.read() {
            if let Some(meta) = cache.get(ty) {
                return Arc::clone(meta);
            }
        }

        let mut fields = BTreeMap::new();
        collect(ty, &mut fields);
        let meta = Arc::new(SchemaMeta {
            ty: ty.clone(),
            fields,
        });
        debug!(shape = %ty, fields = meta.len(), "Schema computed");

        if let Ok(mut cache) = self.cache.write() {
            cache.entry(ty.clone()).or_insert_with(|| Arc::clone(&meta));
        }
        meta
    }

    /// Tests if a schema has already been computed for the given shape.
    #[must_use]
    pub fn is_cached(&self, ty: &DocumentType) -> bool {
        self.cache.read().is_ok_and(|cache| cache.contains_key(ty))
    }
}

fn collect(ty: &DocumentType, fields: &mut BTreeMap<String, FieldDescriptor>) {
    for accessor in ty.accessors() {
        fields
            .entry(accessor.name.clone())
            .or_insert_with(|| FieldDescriptor::new(&accessor.name, &accessor.ty));
    }
    for parent in ty.parents() {
        collect(parent, fields);
    }
}
