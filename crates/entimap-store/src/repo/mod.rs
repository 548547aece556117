//! Repository layer
//!
//! One [`Repository`] per entity type orchestrates CRUD across the row
//! table, the Meta Store and the taxonomy service, and merges all three back
//! into a [`Entity`] on read.
//!
//! ## Logging Ownership
//!
//! Public repository operations own lifecycle logging:
//! - `log_op_start!` at entry
//! - `log_op_end!` on success
//! - `log_op_error!` on failure
//!
//! Hydration and the Meta Store use only `tracing::debug!()`.

pub mod hydration;
pub mod registry;

use crate::config::StoreConfig;
use crate::errors::{from_json, Result};
use crate::host::{Host, Row};
use crate::meta_store::MetaStore;
use crate::sql::{placeholders, quote_ident};
use entimap_core::errors::{ExError, MapError};
use entimap_core::schema::{Cardinality, EntitySchema, PropertyBackend};
use entimap_core::{
    log_op_end, log_op_error, log_op_start, Context, Entity, EntityBackend, SqlValue,
    TypeRegistry, Value,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

pub use registry::RepositoryRegistry;

/// Recomputes data derived from an entity after it is persisted
///
/// Invoked once per create/update, only when at least one property was
/// written.
pub trait DerivedStore {
    /// # Errors
    ///
    /// Whatever the derived write reports; the entity's own writes are not
    /// rolled back.
    fn on_persist(&self, entity: &Entity, updated_props: &[String]) -> Result<()>;
}

pub struct Repository {
    schema: Rc<EntitySchema>,
    types: Rc<TypeRegistry>,
    host: Host,
    config: Rc<StoreConfig>,
    meta: Option<MetaStore>,
    derived: RefCell<Vec<Rc<dyn DerivedStore>>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity_type", &self.schema.entity_type)
            .field("table", &self.schema.table)
            .finish_non_exhaustive()
    }
}

impl Repository {
    pub fn new(
        schema: Rc<EntitySchema>,
        types: Rc<TypeRegistry>,
        host: Host,
        config: Rc<StoreConfig>,
    ) -> Self {
        let meta = schema.meta_table.as_deref().map(|table| {
            MetaStore::new(Rc::clone(&host.db), table).with_owner(&schema.table, &schema.id_field)
        });
        Self {
            schema,
            types,
            host,
            config,
            meta,
            derived: RefCell::new(Vec::new()),
        }
    }

    pub fn schema(&self) -> &Rc<EntitySchema> {
        &self.schema
    }

    pub fn types(&self) -> &Rc<TypeRegistry> {
        &self.types
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn entity_type(&self) -> &str {
        &self.schema.entity_type
    }

    /// Meta Store over this entity type's meta table, if it has one
    pub fn meta_store(&self) -> Option<&MetaStore> {
        self.meta.as_ref()
    }

    pub fn add_derived_store(&self, store: Rc<dyn DerivedStore>) {
        self.derived.borrow_mut().push(store);
    }

    /// A new, unsaved entity bound to this repository
    pub fn new_entity(self: &Rc<Self>) -> Entity {
        Entity::new(Rc::clone(&self.schema), Rc::clone(&self.types)).with_backend(self.backend())
    }

    fn backend(self: &Rc<Self>) -> Rc<dyn EntityBackend> {
        Rc::clone(self) as Rc<dyn EntityBackend>
    }

    // ========== create ==========

    /// Insert a new entity: one row insert, then meta and term writes
    ///
    /// # Errors
    ///
    /// `PersistFailed` if the entity already has an id or the insert yields
    /// none; otherwise the first failing sub-step. Earlier sub-steps are not
    /// rolled back.
    pub fn create(&self, entity: &mut Entity) -> Result<i64> {
        log_op_start!("repository_create", entity_type = %self.schema.entity_type);
        let start = Instant::now();

        let id = self.create_impl(entity).map_err(|e| {
            log_op_error!(
                "repository_create",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "repository_create",
            duration_ms = start.elapsed().as_millis() as u64,
            entity_id = id
        );
        Ok(id)
    }

    fn create_impl(&self, entity: &mut Entity) -> Result<i64> {
        if entity.is_persisted() {
            return Err(self.persist_failed(format!(
                "entity already persisted with id {}",
                entity.id()
            )));
        }

        let mut columns = Vec::with_capacity(self.schema.columns.len());
        let mut params = Vec::with_capacity(self.schema.columns.len());
        for (prop, column) in &self.schema.columns {
            columns.push(quote_ident(&column.storage_name));
            params.push(entity.get_storage(prop)?);
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.schema.table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&self.schema.table),
                columns.join(", "),
                placeholders(columns.len())
            )
        };
        let id = self.host.db.insert(&sql, &params)?;
        if id <= 0 {
            return Err(self.persist_failed("insert returned no id".to_string()));
        }
        entity.set_id(id);

        let mut updated_props: Vec<String> = self.schema.columns.keys().cloned().collect();
        let changed: Vec<String> = entity.get_changes().keys().cloned().collect();
        self.write_side_props(entity, &changed, &mut updated_props)?;

        self.finish_persist(entity, &updated_props)?;
        Ok(id)
    }

    // ========== read ==========

    /// Load an entity by id
    ///
    /// # Errors
    ///
    /// `NotFound` if no row exists, or a persistence error.
    pub fn read(self: &Rc<Self>, id: i64) -> Result<Entity> {
        log_op_start!(
            "repository_read",
            entity_type = %self.schema.entity_type,
            entity_id = id
        );
        let start = Instant::now();

        let entity = self.read_impl(id).map_err(|e| {
            log_op_error!(
                "repository_read",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "repository_read",
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(entity)
    }

    fn read_impl(self: &Rc<Self>, id: i64) -> Result<Entity> {
        let row = if id > 0 { self.fetch_row(id)? } else { None };
        let row = row.ok_or_else(|| {
            ExError::from(MapError::NotFound {
                entity_type: self.schema.entity_type.clone(),
                id,
            })
        })?;
        self.hydrate(&row)
    }

    /// Build an entity from a row already in hand, reading its meta and terms
    ///
    /// # Errors
    ///
    /// `Internal` if the row has no usable id; otherwise as [`Repository::read`].
    pub fn from_row(self: &Rc<Self>, row: &Row) -> Result<Entity> {
        self.cache_row(row);
        self.hydrate(row)
    }

    fn hydrate(self: &Rc<Self>, row: &Row) -> Result<Entity> {
        let id = hydration::row_id(row, &self.schema)?;
        let mut entity =
            Entity::with_id(Rc::clone(&self.schema), Rc::clone(&self.types), id).with_backend(self.backend());
        hydration::hydrate_columns(&mut entity, row)?;
        if let Some(meta) = &self.meta {
            hydration::hydrate_meta(&mut entity, meta)?;
        }
        hydration::hydrate_terms(&mut entity, self.host.taxonomy.as_ref())?;
        entity.set_object_read(true);
        Ok(entity)
    }

    fn row_key(id: i64) -> String {
        format!("row:{}", id)
    }

    fn fetch_row(&self, id: i64) -> Result<Option<Row>> {
        let group = &self.schema.entity_type;
        if self.config.cache_rows {
            if let Some(cached) = self.host.cache.get(&Self::row_key(id), group) {
                match serde_json::from_value::<Row>(cached) {
                    Ok(row) => return Ok(Some(row)),
                    Err(e) => {
                        tracing::debug!(entity_type = %group, entity_id = id, error = %e, "discarding unreadable cached row");
                        self.host.cache.delete(&Self::row_key(id), group);
                    }
                }
            }
        }

        let rows = self.host.db.query(
            &format!(
                "SELECT * FROM {} WHERE {} = ? LIMIT 1",
                quote_ident(&self.schema.table),
                quote_ident(&self.schema.id_field)
            ),
            &[SqlValue::Integer(id)],
        )?;
        let row = rows.into_iter().next();
        if let Some(row) = &row {
            self.cache_row(row);
        }
        Ok(row)
    }

    fn cache_row(&self, row: &Row) {
        if !self.config.cache_rows {
            return;
        }
        let Ok(id) = hydration::row_id(row, &self.schema) else {
            return;
        };
        match serde_json::to_value(row).map_err(from_json) {
            Ok(value) => self
                .host
                .cache
                .set(&Self::row_key(id), value, &self.schema.entity_type),
            Err(e) => tracing::debug!(entity_id = id, error = %e, "row not cacheable"),
        }
    }

    // ========== update ==========

    /// Persist pending changes; a clean entity is left untouched
    ///
    /// # Errors
    ///
    /// `PersistFailed` if the entity has no id or its row is gone; otherwise
    /// the first failing sub-step.
    pub fn update(&self, entity: &mut Entity) -> Result<()> {
        log_op_start!(
            "repository_update",
            entity_type = %self.schema.entity_type,
            entity_id = entity.id()
        );
        let start = Instant::now();

        self.update_impl(entity).map_err(|e| {
            log_op_error!(
                "repository_update",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "repository_update",
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(())
    }

    fn update_impl(&self, entity: &mut Entity) -> Result<()> {
        if !entity.is_persisted() {
            return Err(self.persist_failed("entity has no id".to_string()));
        }
        if !entity.is_dirty() {
            return Ok(());
        }

        let id = entity.id();
        let changed: Vec<String> = entity.get_changes().keys().cloned().collect();
        let mut updated_props = Vec::new();

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for prop in &changed {
            if let Some(column) = self.schema.columns.get(prop) {
                assignments.push(format!("{} = ?", quote_ident(&column.storage_name)));
                params.push(entity.get_storage(prop)?);
                updated_props.push(prop.clone());
            }
        }
        if !assignments.is_empty() {
            params.push(SqlValue::Integer(id));
            let affected = self.host.db.execute(
                &format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    quote_ident(&self.schema.table),
                    assignments.join(", "),
                    quote_ident(&self.schema.id_field)
                ),
                &params,
            )?;
            if affected == 0 {
                return Err(self
                    .persist_failed(format!("no row with id {}", id))
                    .with_entity_id(id));
            }
        }

        self.write_side_props(entity, &changed, &mut updated_props)?;
        self.finish_persist(entity, &updated_props)
    }

    // ========== delete ==========

    /// Remove the row, every meta row and every term association
    ///
    /// Without `force` this is a no-op. Returns whether anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns the first failing sub-step.
    pub fn delete(&self, entity: &mut Entity, force: bool) -> Result<bool> {
        log_op_start!(
            "repository_delete",
            entity_type = %self.schema.entity_type,
            entity_id = entity.id(),
            force = force
        );
        let start = Instant::now();

        let deleted = self.delete_impl(entity, force).map_err(|e| {
            log_op_error!(
                "repository_delete",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "repository_delete",
            duration_ms = start.elapsed().as_millis() as u64,
            deleted = deleted
        );
        Ok(deleted)
    }

    fn delete_impl(&self, entity: &mut Entity, force: bool) -> Result<bool> {
        if !force || !entity.is_persisted() {
            return Ok(false);
        }
        let id = entity.id();

        let affected = self.host.db.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_ident(&self.schema.table),
                quote_ident(&self.schema.id_field)
            ),
            &[SqlValue::Integer(id)],
        )?;
        if let Some(meta) = &self.meta {
            meta.delete_all(id)?;
        }
        let taxonomies = self.schema.taxonomies();
        if !taxonomies.is_empty() {
            self.host.taxonomy.delete_relationships(id, &taxonomies)?;
        }

        self.invalidate(id);
        entity.set_id(0);
        Ok(affected > 0)
    }

    // ========== uniqueness ==========

    /// Whether no row other than `exclude_id` holds `value` for `prop`
    ///
    /// Term-backed properties are always unique.
    ///
    /// # Errors
    ///
    /// `UnknownProperty`, or a persistence error.
    pub fn is_value_unique(&self, prop: &str, value: &SqlValue, exclude_id: i64) -> Result<bool> {
        let backend = self.schema.backend(prop).ok_or_else(|| {
            ExError::from(MapError::UnknownProperty {
                entity_type: self.schema.entity_type.clone(),
                prop: prop.to_string(),
            })
        })?;
        let count = match backend {
            PropertyBackend::Column(column) => self
                .host
                .db
                .query_scalar(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE {} = ? AND {} <> ?",
                        quote_ident(&self.schema.table),
                        quote_ident(&column.storage_name),
                        quote_ident(&self.schema.id_field)
                    ),
                    &[value.clone(), SqlValue::Integer(exclude_id)],
                )?
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            PropertyBackend::Meta(def) => match &self.meta {
                Some(meta) => meta.count_value(&def.key, value, exclude_id)?,
                None => 0,
            },
            PropertyBackend::Term(_) => 0,
        };
        tracing::debug!(
            entity_type = %self.schema.entity_type,
            prop,
            exclude_id,
            count,
            "uniqueness check"
        );
        Ok(count == 0)
    }

    // ========== shared persist steps ==========

    fn write_side_props(
        &self,
        entity: &Entity,
        changed: &[String],
        updated_props: &mut Vec<String>,
    ) -> Result<()> {
        let id = entity.id();
        for prop in changed {
            match self.schema.backend(prop) {
                Some(PropertyBackend::Meta(def)) => {
                    let meta = self.meta.as_ref().ok_or_else(|| {
                        ExError::from(MapError::Internal {
                            message: format!(
                                "{} declares meta props without a meta table",
                                self.schema.entity_type
                            ),
                        })
                    })?;
                    let edit = entity.get(prop, Context::Edit)?;
                    if def.prune_empty && self.types.is_empty(&def.semantic_type, &edit) {
                        meta.delete(id, &def.key)?;
                    } else {
                        meta.update(id, &def.key, &entity.get_storage(prop)?)?;
                    }
                    updated_props.push(prop.clone());
                }
                Some(PropertyBackend::Term(def)) => {
                    let ids = term_ids(&entity.get(prop, Context::Edit)?, def.cardinality);
                    self.host
                        .taxonomy
                        .set_terms(id, &ids, &def.taxonomy, false)?;
                    updated_props.push(prop.clone());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn finish_persist(&self, entity: &mut Entity, updated_props: &[String]) -> Result<()> {
        if !updated_props.is_empty() {
            let derived = self.derived.borrow().clone();
            for store in derived {
                store.on_persist(entity, updated_props)?;
            }
        }
        self.invalidate(entity.id());
        entity.apply_changes();
        entity.set_object_read(true);
        tracing::debug!(
            entity_type = %self.schema.entity_type,
            entity_id = entity.id(),
            updated = updated_props.len(),
            "persist finished"
        );
        Ok(())
    }

    /// Drop the cached row and bump the entity type's cache generation
    fn invalidate(&self, id: i64) {
        let group = &self.schema.entity_type;
        self.host.cache.delete(&Self::row_key(id), group);
        let generation = self.host.cache.bump_generation(group);
        tracing::debug!(entity_type = %group, entity_id = id, generation, "cache invalidated");
    }

    fn persist_failed(&self, reason: String) -> ExError {
        MapError::PersistFailed {
            entity_type: self.schema.entity_type.clone(),
            reason,
        }
        .into()
    }
}

impl EntityBackend for Repository {
    fn is_value_unique(&self, prop: &str, value: &SqlValue, exclude_id: i64) -> Result<bool> {
        Repository::is_value_unique(self, prop, value, exclude_id)
    }

    fn create(&self, entity: &mut Entity) -> Result<()> {
        Repository::create(self, entity).map(|_| ())
    }

    fn update(&self, entity: &mut Entity) -> Result<()> {
        Repository::update(self, entity)
    }
}

/// Term ids held by a term-backed property's edit value
fn term_ids(edit: &Value, cardinality: Cardinality) -> Vec<i64> {
    match (cardinality, edit) {
        (Cardinality::One, Value::Int(id)) if *id > 0 => vec![*id],
        (Cardinality::Many, Value::List(items)) => {
            items.iter().filter_map(Value::as_i64).filter(|id| *id > 0).collect()
        }
        _ => Vec::new(),
    }
}
