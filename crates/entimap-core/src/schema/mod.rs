//! Entity schema
//!
//! Static description of how one entity type is laid out across the row
//! table, the key/value side table and taxonomy term associations. Every
//! property belongs to exactly one backend.

pub mod registry;

use crate::errors::{MapError, Result};
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};

pub use registry::SchemaRegistry;

/// Semantic type of a property (closed set plus named extensions)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SemanticType {
    String,
    Int,
    Float,
    Bool,
    BoolAsInt,
    Date,
    ArrayCsv,
    ArraySerialized,
    Json,
    JsonObject,
    BinaryHex,
    Base64,
    Enum { values: Vec<String> },
    TermRefSingle,
    TermRefArray,
    Slug,
    /// Extension type resolved through the type registry by name
    Custom(String),
}

impl SemanticType {
    /// Parse a type name as written in schema files.
    ///
    /// Unknown names become [`SemanticType::Custom`]; `enum` takes its
    /// allowed values from `values`.
    pub fn parse(name: &str, values: &[String]) -> SemanticType {
        match name {
            "string" => SemanticType::String,
            "int" => SemanticType::Int,
            "float" => SemanticType::Float,
            "bool" => SemanticType::Bool,
            "bool_as_int" => SemanticType::BoolAsInt,
            "date" => SemanticType::Date,
            "array_csv" => SemanticType::ArrayCsv,
            "array_serialized" => SemanticType::ArraySerialized,
            "json" => SemanticType::Json,
            "json_object" => SemanticType::JsonObject,
            "binary_hex" => SemanticType::BinaryHex,
            "base64" => SemanticType::Base64,
            "enum" => SemanticType::Enum {
                values: values.to_vec(),
            },
            "term_ref_single" => SemanticType::TermRefSingle,
            "term_ref_array" => SemanticType::TermRefArray,
            "slug" => SemanticType::Slug,
            other => SemanticType::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SemanticType::String => "string",
            SemanticType::Int => "int",
            SemanticType::Float => "float",
            SemanticType::Bool => "bool",
            SemanticType::BoolAsInt => "bool_as_int",
            SemanticType::Date => "date",
            SemanticType::ArrayCsv => "array_csv",
            SemanticType::ArraySerialized => "array_serialized",
            SemanticType::Json => "json",
            SemanticType::JsonObject => "json_object",
            SemanticType::BinaryHex => "binary_hex",
            SemanticType::Base64 => "base64",
            SemanticType::Enum { .. } => "enum",
            SemanticType::TermRefSingle => "term_ref_single",
            SemanticType::TermRefArray => "term_ref_array",
            SemanticType::Slug => "slug",
            SemanticType::Custom(name) => name,
        }
    }

    /// Numeric types compare numerically in SQL filters
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SemanticType::Int
                | SemanticType::Float
                | SemanticType::BoolAsInt
                | SemanticType::TermRefSingle
        )
    }
}

/// Row-table column mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub storage_name: String,
    pub semantic_type: SemanticType,
    pub default: Value,
    pub unique: bool,
    pub searchable: bool,
}

impl ColumnDef {
    pub fn new(storage_name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            storage_name: storage_name.into(),
            semantic_type,
            default: Value::Null,
            unique: false,
            searchable: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }
}

/// Key/value side-table mapping
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDef {
    pub key: String,
    pub semantic_type: SemanticType,
    pub default: Value,
    pub required: bool,
    pub unique: bool,
    /// Delete the meta row instead of storing an empty value
    pub prune_empty: bool,
}

impl MetaDef {
    pub fn new(key: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            key: key.into(),
            semantic_type,
            default: Value::Null,
            required: false,
            unique: false,
            prune_empty: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn prune_empty(mut self) -> Self {
        self.prune_empty = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Term attribute used when filtering by taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermField {
    Id,
    Slug,
    Name,
}

impl TermField {
    pub fn parse(name: &str) -> Option<TermField> {
        match name {
            "id" | "term_id" => Some(TermField::Id),
            "slug" => Some(TermField::Slug),
            "name" => Some(TermField::Name),
            _ => None,
        }
    }

    /// Column on the terms table
    pub fn column(&self) -> &'static str {
        match self {
            TermField::Id => "term_id",
            TermField::Slug => "slug",
            TermField::Name => "name",
        }
    }
}

/// Taxonomy term mapping
#[derive(Debug, Clone, PartialEq)]
pub struct TermDef {
    pub taxonomy: String,
    pub cardinality: Cardinality,
    pub term_field: TermField,
}

impl TermDef {
    pub fn new(taxonomy: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            taxonomy: taxonomy.into(),
            cardinality,
            term_field: TermField::Id,
        }
    }

    pub fn with_term_field(mut self, term_field: TermField) -> Self {
        self.term_field = term_field;
        self
    }

    pub fn semantic_type(&self) -> SemanticType {
        match self.cardinality {
            Cardinality::One => SemanticType::TermRefSingle,
            Cardinality::Many => SemanticType::TermRefArray,
        }
    }
}

/// Which backend owns a property
#[derive(Debug, Clone, Copy)]
pub enum PropertyBackend<'a> {
    Column(&'a ColumnDef),
    Meta(&'a MetaDef),
    Term(&'a TermDef),
}

/// Immutable per-type storage layout
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    pub entity_type: String,
    pub table: String,
    pub id_field: String,
    pub meta_table: Option<String>,
    pub columns: BTreeMap<String, ColumnDef>,
    pub meta_props: BTreeMap<String, MetaDef>,
    pub term_props: BTreeMap<String, TermDef>,
}

impl EntitySchema {
    /// Start building a schema
    pub fn builder(entity_type: impl Into<String>, table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(entity_type, table)
    }

    /// Property dispatch: which backend stores `prop`
    pub fn backend(&self, prop: &str) -> Option<PropertyBackend<'_>> {
        if let Some(def) = self.columns.get(prop) {
            return Some(PropertyBackend::Column(def));
        }
        if let Some(def) = self.meta_props.get(prop) {
            return Some(PropertyBackend::Meta(def));
        }
        self.term_props.get(prop).map(PropertyBackend::Term)
    }

    pub fn has_prop(&self, prop: &str) -> bool {
        self.backend(prop).is_some()
    }

    pub fn semantic_type(&self, prop: &str) -> Option<SemanticType> {
        self.backend(prop).map(|backend| match backend {
            PropertyBackend::Column(def) => def.semantic_type.clone(),
            PropertyBackend::Meta(def) => def.semantic_type.clone(),
            PropertyBackend::Term(def) => def.semantic_type(),
        })
    }

    /// Declared default; term props default to "no terms"
    pub fn default_value(&self, prop: &str) -> Value {
        match self.backend(prop) {
            Some(PropertyBackend::Column(def)) => def.default.clone(),
            Some(PropertyBackend::Meta(def)) => def.default.clone(),
            Some(PropertyBackend::Term(_)) | None => Value::Null,
        }
    }

    /// Every property name, columns first
    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.columns
            .keys()
            .chain(self.meta_props.keys())
            .chain(self.term_props.keys())
            .map(String::as_str)
    }

    pub fn is_unique(&self, prop: &str) -> bool {
        match self.backend(prop) {
            Some(PropertyBackend::Column(def)) => def.unique,
            Some(PropertyBackend::Meta(def)) => def.unique,
            _ => false,
        }
    }

    pub fn is_required(&self, prop: &str) -> bool {
        matches!(self.backend(prop), Some(PropertyBackend::Meta(def)) if def.required)
    }

    pub fn searchable_columns(&self) -> Vec<&ColumnDef> {
        self.columns.values().filter(|c| c.searchable).collect()
    }

    pub fn date_columns(&self) -> Vec<(&str, &ColumnDef)> {
        self.columns
            .iter()
            .filter(|(_, c)| c.semantic_type == SemanticType::Date)
            .map(|(prop, c)| (prop.as_str(), c))
            .collect()
    }

    pub fn meta_keys(&self) -> Vec<&str> {
        self.meta_props.values().map(|m| m.key.as_str()).collect()
    }

    /// Meta prop name owning a side-table key
    pub fn meta_prop_for_key(&self, key: &str) -> Option<(&str, &MetaDef)> {
        self.meta_props
            .iter()
            .find(|(_, m)| m.key == key)
            .map(|(prop, m)| (prop.as_str(), m))
    }

    pub fn taxonomies(&self) -> Vec<&str> {
        self.term_props.values().map(|t| t.taxonomy.as_str()).collect()
    }

    /// Column prop name for a storage column name
    pub fn column_prop_for_storage(&self, storage_name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, c)| c.storage_name == storage_name)
            .map(|(prop, _)| prop.as_str())
    }

    /// Validate the schema; called on registration
    ///
    /// # Errors
    ///
    /// `SchemaInvalid` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> crate::errors::ExError {
            MapError::SchemaInvalid {
                entity_type: self.entity_type.clone(),
                reason,
            }
            .into()
        };

        if self.entity_type.trim().is_empty() {
            return Err(invalid("entity type is empty".to_string()));
        }
        for (label, name) in [("table", &self.table), ("id field", &self.id_field)] {
            if !is_identifier(name) {
                return Err(invalid(format!("{} {:?} is not a valid identifier", label, name)));
            }
        }
        if let Some(meta_table) = &self.meta_table {
            if !is_identifier(meta_table) {
                return Err(invalid(format!(
                    "meta table {:?} is not a valid identifier",
                    meta_table
                )));
            }
        } else if !self.meta_props.is_empty() {
            return Err(invalid("meta properties declared without a meta table".to_string()));
        }

        let mut props = HashSet::new();
        for prop in self.prop_names() {
            if !is_identifier(prop) {
                return Err(invalid(format!("property {:?} is not a valid identifier", prop)));
            }
            if prop == self.id_field {
                return Err(invalid(format!("property {:?} shadows the id field", prop)));
            }
            if !props.insert(prop) {
                return Err(invalid(format!(
                    "property {:?} is mapped to more than one backend",
                    prop
                )));
            }
        }

        let mut storage_names = HashSet::new();
        for (prop, column) in &self.columns {
            if !is_identifier(&column.storage_name) || column.storage_name == self.id_field {
                return Err(invalid(format!(
                    "column {:?} of {} is not usable",
                    column.storage_name, prop
                )));
            }
            if !storage_names.insert(column.storage_name.as_str()) {
                return Err(invalid(format!(
                    "column {:?} is mapped twice",
                    column.storage_name
                )));
            }
            check_type(&column.semantic_type).map_err(|r| invalid(format!("{}: {}", prop, r)))?;
        }

        let mut meta_keys = HashSet::new();
        for (prop, meta) in &self.meta_props {
            if meta.key.trim().is_empty() {
                return Err(invalid(format!("meta key of {} is empty", prop)));
            }
            if !meta_keys.insert(meta.key.as_str()) {
                return Err(invalid(format!("meta key {:?} is mapped twice", meta.key)));
            }
            check_type(&meta.semantic_type).map_err(|r| invalid(format!("{}: {}", prop, r)))?;
        }

        for (prop, term) in &self.term_props {
            if term.taxonomy.trim().is_empty() {
                return Err(invalid(format!("taxonomy of {} is empty", prop)));
            }
        }

        Ok(())
    }
}

fn check_type(semantic_type: &SemanticType) -> std::result::Result<(), String> {
    match semantic_type {
        SemanticType::Enum { values } if values.is_empty() => {
            Err("enum declares no values".to_string())
        }
        SemanticType::Custom(name) if name.trim().is_empty() => {
            Err("custom type has no name".to_string())
        }
        _ => Ok(()),
    }
}

/// `^[A-Za-z_][A-Za-z0-9_]*$`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Fluent construction of an [`EntitySchema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: EntitySchema,
}

impl SchemaBuilder {
    pub fn new(entity_type: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: EntitySchema {
                entity_type: entity_type.into(),
                table: table.into(),
                id_field: "id".to_string(),
                meta_table: None,
                columns: BTreeMap::new(),
                meta_props: BTreeMap::new(),
                term_props: BTreeMap::new(),
            },
        }
    }

    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.schema.id_field = id_field.into();
        self
    }

    pub fn meta_table(mut self, meta_table: impl Into<String>) -> Self {
        self.schema.meta_table = Some(meta_table.into());
        self
    }

    pub fn column(mut self, prop: impl Into<String>, def: ColumnDef) -> Self {
        self.schema.columns.insert(prop.into(), def);
        self
    }

    pub fn meta(mut self, prop: impl Into<String>, def: MetaDef) -> Self {
        self.schema.meta_props.insert(prop.into(), def);
        self
    }

    pub fn term(mut self, prop: impl Into<String>, def: TermDef) -> Self {
        self.schema.term_props.insert(prop.into(), def);
        self
    }

    /// Validate and return the schema
    ///
    /// # Errors
    ///
    /// `SchemaInvalid` if validation fails.
    pub fn build(self) -> Result<EntitySchema> {
        self.schema.validate()?;
        Ok(self.schema)
    }
}
