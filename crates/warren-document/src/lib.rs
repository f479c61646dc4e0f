//! # Warren Document Model
//!
//! Declarative document shapes and the generic codec that (de)serializes them
//! without per-type hand-written code.
//!
//! ## Overview
//!
//! A *document shape* ([`DocumentType`]) is a declarative description of a
//! structured record: a set of named, typed, zero-argument accessors. Shapes
//! carry no behavior; a concrete value is a [`DocumentValue`]: an immutable
//! bag of `name -> value` entries tagged with its shape.
//!
//! ```text
//! DocumentType ──schema_of──→ SchemaMeta ──drives──→ DocumentCodec
//!      │                                                  │
//!      └───── DocumentValue::builder ──→ DocumentValue ←──┘ (decode)
//! ```
//!
//! The [`SchemaRegistry`] computes field metadata once per shape and caches
//! it; the [`DocumentCodec`] walks that metadata to encode values into a
//! self-describing JSON object keyed by field name, and to decode such
//! objects back into values, recursing through nested document fields.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod codec;
pub mod schema;
pub mod shape;
pub mod value;

// Re-export main types
pub use codec::{DecodeError, DocumentCodec, EncodeError};
pub use schema::{FieldDescriptor, SchemaMeta, SchemaRegistry};
pub use shape::{DocumentType, DocumentTypeBuilder, FieldType};
pub use value::{DocumentValue, DocumentValueBuilder, Value};
