//! Schema file loader
//!
//! Parses entity schemas from YAML and validates them before they reach a
//! [`SchemaRegistry`].
//!
//! ```yaml
//! schema_version: 1
//! entities:
//!   product:
//!     table: products
//!     meta_table: product_meta
//!     columns:
//!       name: { type: string, unique: true, searchable: true }
//!     meta:
//!       color: { key: _color, type: string }
//!     terms:
//!       tags: { taxonomy: product_tag, cardinality: many, term_field: slug }
//! ```

use crate::errors::{io_error, schema_file_error, Result};
use entimap_core::schema::{
    Cardinality, ColumnDef, EntitySchema, MetaDef, SchemaRegistry, SemanticType, TermDef,
    TermField,
};
use entimap_core::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// Supported `schema_version`
pub const SCHEMA_FILE_VERSION: u32 = 1;

/// Top-level schema file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFileV1 {
    pub schema_version: u32,

    /// Entity definitions keyed by entity type name
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDoc {
    pub table: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub meta_table: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnDoc>,
    #[serde(default)]
    pub meta: BTreeMap<String, MetaDoc>,
    #[serde(default)]
    pub terms: BTreeMap<String, TermDoc>,
}

/// Column declaration; `column` defaults to the property name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDoc {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub searchable: bool,
    /// Allowed values for `type: enum`
    #[serde(default)]
    pub values: Vec<String>,
}

/// Meta declaration; `key` defaults to the property name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaDoc {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub prune_empty: bool,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TermDoc {
    pub taxonomy: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: String,
    #[serde(default)]
    pub term_field: Option<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_cardinality() -> String {
    "many".to_string()
}

/// Parse a schema file from a path
///
/// # Errors
///
/// Returns an IO error if the file cannot be read, otherwise as
/// [`parse_schema_str`].
pub fn parse_schema_file(path: &Path) -> Result<Vec<EntitySchema>> {
    let content = fs::read_to_string(path).map_err(|e| io_error("schema_file_read", e))?;
    parse_schema_str(&content)
}

/// Parse and validate every entity in a schema document
///
/// # Errors
///
/// Returns `SchemaInvalid` for malformed YAML, an unsupported version,
/// unknown cardinalities or term fields, or any schema validation failure.
pub fn parse_schema_str(content: &str) -> Result<Vec<EntitySchema>> {
    let doc: SchemaFileV1 = serde_yaml::from_str(content)
        .map_err(|e| schema_file_error(&format!("YAML parse error: {}", e)))?;

    if doc.schema_version != SCHEMA_FILE_VERSION {
        return Err(schema_file_error(&format!(
            "Unsupported schema_version: {}. Expected {}",
            doc.schema_version, SCHEMA_FILE_VERSION
        )));
    }

    let mut schemas = Vec::with_capacity(doc.entities.len());
    for (entity_type, entity) in &doc.entities {
        let schema = build_entity(entity_type, entity)
            .map_err(|e| e.with_entity_type(entity_type.clone()))?;
        schemas.push(schema);
    }
    tracing::debug!(entity_count = schemas.len(), "schema file parsed");
    Ok(schemas)
}

/// Parse a schema file and register every entity it declares
///
/// # Errors
///
/// As [`parse_schema_file`], plus `SchemaInvalid` if registration fails.
pub fn load_into(path: &Path, registry: &mut SchemaRegistry) -> Result<Vec<Rc<EntitySchema>>> {
    parse_schema_file(path)?
        .into_iter()
        .map(|schema| registry.register(schema))
        .collect()
}

fn build_entity(entity_type: &str, doc: &EntityDoc) -> Result<EntitySchema> {
    let mut builder = EntitySchema::builder(entity_type, doc.table.as_str()).id_field(&doc.id_field);
    if let Some(meta_table) = &doc.meta_table {
        builder = builder.meta_table(meta_table.as_str());
    }

    for (prop, column) in &doc.columns {
        let storage = column.column.clone().unwrap_or_else(|| prop.clone());
        let mut def = ColumnDef::new(storage, SemanticType::parse(&column.type_name, &column.values));
        if let Some(default) = &column.default {
            def = def.with_default(Value::from_json(default));
        }
        if column.unique {
            def = def.unique();
        }
        if column.searchable {
            def = def.searchable();
        }
        builder = builder.column(prop.as_str(), def);
    }

    for (prop, meta) in &doc.meta {
        let key = meta.key.clone().unwrap_or_else(|| prop.clone());
        let mut def = MetaDef::new(key, SemanticType::parse(&meta.type_name, &meta.values));
        if let Some(default) = &meta.default {
            def = def.with_default(Value::from_json(default));
        }
        if meta.required {
            def = def.required();
        }
        if meta.unique {
            def = def.unique();
        }
        if meta.prune_empty {
            def = def.prune_empty();
        }
        builder = builder.meta(prop.as_str(), def);
    }

    for (prop, term) in &doc.terms {
        let cardinality = match term.cardinality.as_str() {
            "one" => Cardinality::One,
            "many" => Cardinality::Many,
            other => {
                return Err(schema_file_error(&format!(
                    "Unknown cardinality {:?} for {}.{}",
                    other, entity_type, prop
                )))
            }
        };
        let mut def = TermDef::new(term.taxonomy.as_str(), cardinality);
        if let Some(field) = &term.term_field {
            let field = TermField::parse(field).ok_or_else(|| {
                schema_file_error(&format!(
                    "Unknown term_field {:?} for {}.{}",
                    field, entity_type, prop
                ))
            })?;
            def = def.with_term_field(field);
        }
        builder = builder.term(prop.as_str(), def);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_core::ExErrorKind;

    const PRODUCT: &str = r#"
schema_version: 1
entities:
  product:
    table: products
    meta_table: product_meta
    columns:
      name: { type: string, unique: true, searchable: true }
      status: { type: enum, values: [draft, live], default: draft }
      stock: { type: int, column: stock_qty }
    meta:
      color: { key: _color, type: string }
      sku: { type: string, required: true, unique: true }
    terms:
      tags: { taxonomy: product_tag, term_field: slug }
      brand: { taxonomy: brand, cardinality: one }
"#;

    #[test]
    fn test_parse_full_entity() {
        let schemas = parse_schema_str(PRODUCT).unwrap();
        assert_eq!(schemas.len(), 1);
        let product = &schemas[0];
        assert_eq!(product.entity_type, "product");
        assert_eq!(product.id_field, "id");
        assert_eq!(product.columns["stock"].storage_name, "stock_qty");
        assert_eq!(product.meta_props["sku"].key, "sku");
        assert!(product.meta_props["sku"].required);
        assert_eq!(product.term_props["tags"].term_field, TermField::Slug);
        assert_eq!(product.term_props["brand"].cardinality, Cardinality::One);
        assert_eq!(product.default_value("status"), Value::Text("draft".into()));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let err = parse_schema_str("schema_version: 2\nentities: {}").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::SchemaInvalid);
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_rejects_unknown_cardinality() {
        let err = parse_schema_str(
            "schema_version: 1\nentities:\n  p:\n    table: p\n    terms:\n      t: { taxonomy: x, cardinality: some }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown cardinality"));
    }

    #[test]
    fn test_meta_without_table_fails_validation() {
        let err = parse_schema_str(
            "schema_version: 1\nentities:\n  p:\n    table: p\n    meta:\n      color: { type: string }",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::SchemaInvalid);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(parse_schema_str("schema_version: 1\ncolour: red").is_err());
    }
}
