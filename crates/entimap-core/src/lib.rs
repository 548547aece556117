//! entimap core - schema, coercion and in-memory entities
//!
//! This crate provides the storage-agnostic half of the mapping layer:
//! - Entity Schema describing how an entity type is split across a row
//!   table, a key/value meta table and taxonomy terms
//! - Property Coercion Engine converting values between their edit, view
//!   and storage representations
//! - Domain Entity with change tracking and write-time validation
//! - Canonical error and logging facilities shared by every crate
//!
//! Persistence lives in `entimap-store`; entities reach it only through the
//! [`EntityBackend`] capability.

pub mod entity;
pub mod errors;
pub mod logging_facility;
pub mod property;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use entity::{Entity, EntityBackend};
pub use errors::{ExError, ExErrorKind, MapError, Result};
pub use property::{Context, PropertyType, TypeRegistry};
pub use schema::{
    Cardinality, ColumnDef, EntitySchema, MetaDef, PropertyBackend, SchemaBuilder,
    SchemaRegistry, SemanticType, TermDef, TermField,
};
pub use value::{SqlValue, Value};
