//! Schema registry
//!
//! Maps entity type names to their validated, shared [`EntitySchema`].
//! Passed explicitly to whatever needs schema lookups.

use super::EntitySchema;
use crate::errors::{MapError, Result};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Rc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a schema, replacing any previous registration
    /// for the same entity type.
    ///
    /// # Errors
    ///
    /// `SchemaInvalid` if the schema fails validation.
    pub fn register(&mut self, schema: EntitySchema) -> Result<Rc<EntitySchema>> {
        schema.validate()?;
        let schema = Rc::new(schema);
        tracing::debug!(entity_type = %schema.entity_type, "schema registered");
        self.schemas
            .insert(schema.entity_type.clone(), Rc::clone(&schema));
        Ok(schema)
    }

    /// Look up a schema by entity type
    ///
    /// # Errors
    ///
    /// `SchemaInvalid` (unknown entity type) if nothing is registered.
    pub fn get(&self, entity_type: &str) -> Result<Rc<EntitySchema>> {
        self.schemas.get(entity_type).cloned().ok_or_else(|| {
            MapError::UnknownEntityType {
                entity_type: entity_type.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.schemas.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;
    use crate::schema::{ColumnDef, SemanticType};

    #[test]
    fn test_register_and_get() {
        let mut registry = SchemaRegistry::new();
        let schema = EntitySchema::builder("note", "notes")
            .column("title", ColumnDef::new("title", SemanticType::String))
            .build()
            .unwrap();
        registry.register(schema).unwrap();
        assert!(registry.contains("note"));
        assert_eq!(registry.get("note").unwrap().table, "notes");
    }

    #[test]
    fn test_unknown_type() {
        let registry = SchemaRegistry::new();
        let err = registry.get("ghost").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::SchemaInvalid);
    }

    #[test]
    fn test_register_validates() {
        let mut registry = SchemaRegistry::new();
        let mut schema = EntitySchema::builder("note", "notes").build().unwrap();
        schema.table = "bad table".to_string();
        assert!(registry.register(schema).is_err());
        assert!(registry.is_empty());
    }
}
