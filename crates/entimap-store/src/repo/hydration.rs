//! Hydration layer - merges row, meta and term storage into an entity
//!
//! Values are loaded without validation; the caller flips `object_read`
//! once every backend has been merged.

use crate::errors::Result;
use crate::host::{Row, TaxonomyService};
use crate::meta_store::MetaStore;
use entimap_core::errors::MapError;
use entimap_core::schema::{Cardinality, EntitySchema};
use entimap_core::{Entity, Value};

/// The id column of a row
///
/// # Errors
///
/// `Internal` if the row lacks a positive id.
pub fn row_id(row: &Row, schema: &EntitySchema) -> Result<i64> {
    row.get(&schema.id_field)
        .and_then(|v| v.as_i64())
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            MapError::Internal {
                message: format!(
                    "row of {} has no usable {} column",
                    schema.entity_type, schema.id_field
                ),
            }
            .into()
        })
}

/// Load every column property present in the row
///
/// Columns missing from a partial row keep their defaults.
///
/// Stored values are trusted; an enum value no longer in its set is kept.
///
/// # Errors
///
/// `UnknownProperty` only if the schema and entity disagree.
pub fn hydrate_columns(entity: &mut Entity, row: &Row) -> Result<()> {
    let schema = std::rc::Rc::clone(entity.schema());
    let types = std::rc::Rc::clone(entity.types());
    for (prop, column) in &schema.columns {
        if let Some(stored) = row.get(&column.storage_name) {
            let edit = types.from_storage(&column.semantic_type, stored);
            entity.load(prop, &edit)?;
        }
    }
    Ok(())
}

/// Bulk-read the declared meta keys and load the ones present
///
/// # Errors
///
/// Returns a persistence error if the read fails.
pub fn hydrate_meta(entity: &mut Entity, meta: &MetaStore) -> Result<()> {
    let schema = std::rc::Rc::clone(entity.schema());
    let types = std::rc::Rc::clone(entity.types());
    let keys = schema.meta_keys();
    if keys.is_empty() {
        return Ok(());
    }
    let values = meta.get_many(entity.id(), &keys)?;
    for (key, stored) in &values {
        if let Some((prop, def)) = schema.meta_prop_for_key(key) {
            let edit = types.from_storage(&def.semantic_type, stored);
            entity.load(prop, &edit)?;
        }
    }
    tracing::debug!(
        entity_type = %schema.entity_type,
        entity_id = entity.id(),
        loaded = values.len(),
        "meta hydrated"
    );
    Ok(())
}

/// Load term ids for every term-backed property
///
/// # Errors
///
/// Returns a persistence error if a lookup fails.
pub fn hydrate_terms(entity: &mut Entity, taxonomy: &dyn TaxonomyService) -> Result<()> {
    let schema = std::rc::Rc::clone(entity.schema());
    for (prop, def) in &schema.term_props {
        let ids = taxonomy.get_terms(entity.id(), &def.taxonomy)?;
        let value = match def.cardinality {
            Cardinality::One => Value::Int(ids.first().copied().unwrap_or(0)),
            Cardinality::Many => Value::List(ids.into_iter().map(Value::Int).collect()),
        };
        entity.load(prop, &value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Row;
    use entimap_core::schema::{ColumnDef, SemanticType};
    use entimap_core::{Context, ExErrorKind, TypeRegistry};
    use std::rc::Rc;

    fn schema() -> Rc<EntitySchema> {
        Rc::new(
            EntitySchema::builder("product", "products")
                .column("name", ColumnDef::new("name", SemanticType::String))
                .column("active", ColumnDef::new("is_active", SemanticType::Bool))
                .column("stock", ColumnDef::new("stock", SemanticType::Int).with_default(7))
                .column(
                    "status",
                    ColumnDef::new(
                        "status",
                        SemanticType::Enum {
                            values: vec!["draft".to_string(), "live".to_string()],
                        },
                    ),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_partial_row_keeps_defaults() {
        let schema = schema();
        let mut entity = Entity::with_id(Rc::clone(&schema), Rc::new(TypeRegistry::new()), 3);
        let row = Row::new()
            .with("id", 3i64)
            .with("name", "Blue Mug")
            .with("is_active", "yes");
        hydrate_columns(&mut entity, &row).unwrap();
        assert_eq!(entity.get("active", Context::Edit).unwrap(), Value::Bool(true));
        assert_eq!(entity.get("stock", Context::Edit).unwrap(), Value::Int(7));
        assert!(!entity.is_dirty());
    }

    #[test]
    fn test_retired_enum_value_still_hydrates() {
        let schema = schema();
        let mut entity = Entity::with_id(Rc::clone(&schema), Rc::new(TypeRegistry::new()), 4);
        let row = Row::new().with("id", 4i64).with("status", "archived");

        hydrate_columns(&mut entity, &row).unwrap();

        assert_eq!(entity.get("status", Context::Edit).unwrap(), Value::from("archived"));
        assert!(!entity.is_dirty());
        // writes still go through the enum check
        let err = entity.set("status", Value::from("retired")).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidEnumValue);
    }

    #[test]
    fn test_row_id_requires_positive_id() {
        let schema = schema();
        assert_eq!(row_id(&Row::new().with("id", 5i64), &schema).unwrap(), 5);
        let err = row_id(&Row::new().with("name", "x"), &schema).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Internal);
    }
}
