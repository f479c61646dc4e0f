//! # Message Registry
//!
//! Maintains the bidirectional mapping between logical message ids and
//! document shapes. Ids travel on the wire as the delivery's type tag;
//! shapes are what application code publishes and subscribes with.
//!
//! Resolution from shape to id tolerates unregistered subtypes: the registry
//! walks the shape's declared parents depth-first and answers with the first
//! registered ancestor's id, caching the result under the original shape so
//! the walk happens once.

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;
use warren_document::DocumentType;

/// Errors from message registration and lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two different shapes were registered under the same id.
    #[error("Message id '{id}' is registered to '{existing}', cannot register '{incoming}'")]
    DuplicateId {
        id: String,
        existing: String,
        incoming: String,
    },

    /// Neither the shape nor any of its ancestors is registered.
    #[error("No message id registered for '{ty}' or any of its ancestors")]
    Unregistered { ty: String },
}

/// Metadata describing a registered message: its shape and its id.
///
/// The id is the shape's declared registry-id override if present, else the
/// shape's simple name.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMeta {
    ty: DocumentType,
    id: String,
}

impl MessageMeta {
    /// Creates metadata for the given shape.
    #[must_use]
    pub fn new(ty: &DocumentType) -> Self {
        let id = ty.registry_id().unwrap_or_else(|| ty.name()).to_string();
        Self { ty: ty.clone(), id }
    }

    /// Gets the message shape.
    #[must_use]
    pub fn ty(&self) -> &DocumentType {
        &self.ty
    }

    /// Gets the message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Collects message shapes at startup and produces the registry.
#[derive(Default)]
pub struct MessageBinder {
    messages: Vec<MessageMeta>,
}

impl MessageBinder {
    /// Creates an empty binder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message shape to the set.
    #[must_use]
    pub fn register(mut self, ty: &DocumentType) -> Self {
        self.messages.push(MessageMeta::new(ty));
        self
    }

    /// Builds the registry from the collected set.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateId` if an id collides with a different
    /// shape; registering the exact same shape twice is idempotent.
    pub fn bind(self) -> Result<MessageRegistry, RegistryError> {
        MessageRegistry::new(self.messages)
    }
}

/// The bidirectional id/shape index.
///
/// The id map is immutable after construction. The shape map doubles as a
/// cache: populated eagerly for registered shapes, lazily for subtypes
/// resolved through ancestor search. Concurrent lazy fills may race; both
/// racers store the same metadata, so the last write wins harmlessly.
#[derive(Debug)]
pub struct MessageRegistry {
    /// Map of message ids to metadata.
    id: HashMap<String, MessageMeta>,
    /// Cache of shapes to metadata, extended lazily for subtypes.
    ty: RwLock<HashMap<DocumentType, MessageMeta>>,
}

impl MessageRegistry {
    /// Creates a registry from a set of message metadata.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateId` if an id collides with a different
    /// shape.
    pub fn new(messages: impl IntoIterator<Item = MessageMeta>) -> Result<Self, RegistryError> {
        let mut id: HashMap<String, MessageMeta> = HashMap::new();
        let mut ty: HashMap<DocumentType, MessageMeta> = HashMap::new();
        for meta in messages {
            if let Some(existing) = id.get(meta.id()) {
                if existing.ty() != meta.ty() {
                    return Err(RegistryError::DuplicateId {
                        id: meta.id().to_string(),
                        existing: existing.ty().name().to_string(),
                        incoming: meta.ty().name().to_string(),
                    });
                }
            }
            id.insert(meta.id().to_string(), meta.clone());
            ty.insert(meta.ty().clone(), meta);
        }
        Ok(Self {
            id,
            ty: RwLock::new(ty),
        })
    }

    /// Gets the shape registered for the given id.
    ///
    /// Direct lookup only: ids are always registered exactly, so no
    /// hierarchy logic applies here.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<DocumentType> {
        self.id.get(id).map(|meta| meta.ty().clone())
    }

    /// Gets the id for the given shape.
    ///
    /// Succeeds for the shape itself or for any registered ancestor: on a
    /// cache miss the declared parents are walked depth-first, preorder, in
    /// declaration order (specialized supertype before capability parents),
    /// and the first registered ancestor's id is answered and cached under
    /// the original shape.
    ///
    /// # Errors
    ///
    /// `RegistryError::Unregistered` if no ancestor is registered, a
    /// caller bug that must be fixed at registration, not retried.
    pub fn id_of(&self, ty: &DocumentType) -> Result<String, RegistryError> {
        let found = {
            let cache = self.ty.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(meta) = cache.get(ty) {
                return Ok(meta.id().to_string());
            }
            search(&cache, ty)
        };

        match found {
            Some(meta) => {
                debug!(shape = %ty, ancestor = %meta.ty(), id = %meta.id(), "Resolved message id via ancestor");
                let id = meta.id().to_string();
                let mut cache = self.ty.write().unwrap_or_else(std::sync::PoisonError::into_inner);
                cache.insert(ty.clone(), meta);
                Ok(id)
            }
            None => Err(RegistryError::Unregistered {
                ty: ty.name().to_string(),
            }),
        }
    }

    /// Tests if the given shape has a cache entry, eager or lazily filled.
    #[must_use]
    pub fn is_cached(&self, ty: &DocumentType) -> bool {
        self.ty
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(ty)
    }

    /// Gets the number of registered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id.len()
    }

    /// Tests if the registry has no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// Preorder depth-first walk over the declared parents: each parent is
/// checked before its own ancestors, parents in declaration order.
fn search(cache: &HashMap<DocumentType, MessageMeta>, ty: &DocumentType) -> Option<MessageMeta> {
    for parent in ty.parents() {
        if let Some(meta) = cache.get(parent) {
            return Some(meta.clone());
        }
        if let Some(meta) = search(cache, parent) {
            return Some(meta);
        }
    }
    None
}
