//! Domain Entity
//!
//! In-memory instance of an entity type: persisted values (`data`), pending
//! edits (`changes`) and the `object_read` flag that switches on write-time
//! validation. Conversion is delegated to the [`TypeRegistry`]; persistence
//! is delegated to an attached [`EntityBackend`].

use crate::errors::{ExError, MapError, Result};
use crate::property::{Context, TypeRegistry};
use crate::schema::{EntitySchema, SemanticType};
use crate::value::{SqlValue, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Persistence capability an entity holds on to
///
/// Implemented by the repository; the entity only ever sees this interface.
pub trait EntityBackend {
    /// Whether no live row other than `exclude_id` holds `value` for `prop`
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the lookup fails.
    fn is_value_unique(&self, prop: &str, value: &SqlValue, exclude_id: i64) -> Result<bool>;

    /// Insert a new entity and assign its id
    ///
    /// # Errors
    ///
    /// Returns `PersistFailed` or a persistence error.
    fn create(&self, entity: &mut Entity) -> Result<()>;

    /// Persist the entity's pending changes
    ///
    /// # Errors
    ///
    /// Returns `PersistFailed` or a persistence error.
    fn update(&self, entity: &mut Entity) -> Result<()>;
}

pub struct Entity {
    schema: Rc<EntitySchema>,
    types: Rc<TypeRegistry>,
    backend: Option<Rc<dyn EntityBackend>>,
    id: i64,
    data: BTreeMap<String, Value>,
    changes: BTreeMap<String, Value>,
    object_read: bool,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.schema.entity_type)
            .field("id", &self.id)
            .field("data", &self.data)
            .field("changes", &self.changes)
            .field("object_read", &self.object_read)
            .field("bound", &self.backend.is_some())
            .finish()
    }
}

impl Entity {
    /// Create a new, unsaved entity
    ///
    /// New entities validate writes immediately.
    pub fn new(schema: Rc<EntitySchema>, types: Rc<TypeRegistry>) -> Self {
        Self {
            schema,
            types,
            backend: None,
            id: 0,
            data: BTreeMap::new(),
            changes: BTreeMap::new(),
            object_read: true,
        }
    }

    /// Create an empty shell for an existing id, to be hydrated
    pub fn with_id(schema: Rc<EntitySchema>, types: Rc<TypeRegistry>, id: i64) -> Self {
        Self {
            id,
            object_read: false,
            ..Self::new(schema, types)
        }
    }

    pub fn with_backend(mut self, backend: Rc<dyn EntityBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn attach_backend(&mut self, backend: Rc<dyn EntityBackend>) {
        self.backend = Some(backend);
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Set the persisted id (0 marks the entity as not persisted)
    pub fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    pub fn schema(&self) -> &Rc<EntitySchema> {
        &self.schema
    }

    pub fn types(&self) -> &Rc<TypeRegistry> {
        &self.types
    }

    pub fn entity_type(&self) -> &str {
        &self.schema.entity_type
    }

    pub fn is_object_read(&self) -> bool {
        self.object_read
    }

    pub fn set_object_read(&mut self, object_read: bool) {
        self.object_read = object_read;
    }

    fn semantic_type(&self, prop: &str) -> Result<SemanticType> {
        self.schema.semantic_type(prop).ok_or_else(|| {
            MapError::UnknownProperty {
                entity_type: self.schema.entity_type.clone(),
                prop: prop.to_string(),
            }
            .into()
        })
    }

    fn default_of(&self, prop: &str, ty: &SemanticType) -> Value {
        let raw = self.schema.default_value(prop);
        if raw.is_null() {
            return self.types.zero(ty);
        }
        self.types
            .to_edit(ty, &raw)
            .unwrap_or_else(|_| self.types.zero(ty))
    }

    fn persisted(&self, prop: &str, ty: &SemanticType) -> Value {
        self.data
            .get(prop)
            .cloned()
            .unwrap_or_else(|| self.default_of(prop, ty))
    }

    fn current(&self, prop: &str, ty: &SemanticType) -> Value {
        match self.changes.get(prop) {
            Some(value) => value.clone(),
            None => self.persisted(prop, ty),
        }
    }

    fn contextualize(&self, err: ExError, prop: &str) -> ExError {
        let err = err
            .with_entity_type(self.schema.entity_type.clone())
            .with_prop(prop);
        if self.id > 0 {
            err.with_entity_id(self.id)
        } else {
            err
        }
    }

    /// Hydrate a property from a stored or otherwise trusted value
    ///
    /// Bypasses validation and change tracking; an enum value outside the
    /// current set is kept as stored.
    ///
    /// # Errors
    ///
    /// `UnknownProperty` if the schema does not declare `prop`.
    pub fn load(&mut self, prop: &str, raw: &Value) -> Result<()> {
        let ty = self.semantic_type(prop)?;
        let edit = self.types.decode(&ty, raw);
        self.changes.remove(prop);
        self.data.insert(prop.to_string(), edit);
        Ok(())
    }

    /// Read a property in the requested representation
    ///
    /// # Errors
    ///
    /// `UnknownProperty` if the schema does not declare `prop`.
    pub fn get(&self, prop: &str, context: Context) -> Result<Value> {
        let ty = self.semantic_type(prop)?;
        let edit = self.current(prop, &ty);
        Ok(self.types.in_context(&ty, &edit, context))
    }

    /// Storage encoding of a property
    ///
    /// # Errors
    ///
    /// `UnknownProperty` if the schema does not declare `prop`.
    pub fn get_storage(&self, prop: &str) -> Result<SqlValue> {
        let ty = self.semantic_type(prop)?;
        Ok(self.types.encode(&ty, &self.current(prop, &ty)))
    }

    /// Write a property
    ///
    /// Before the entity is read, values are stored as-is. Afterwards the
    /// value must pass uniqueness, required-ness and the type validator, and
    /// is recorded in the change-set only if it differs from the persisted
    /// value.
    ///
    /// # Errors
    ///
    /// `UnknownProperty`, `InvalidEnumValue`, `DuplicateValue`,
    /// `MissingRequired`, or `InvalidInput` from a type validator.
    pub fn set(&mut self, prop: &str, raw: impl Into<Value>) -> Result<()> {
        let raw = raw.into();
        let ty = self.semantic_type(prop)?;
        let edit = self
            .types
            .to_edit(&ty, &raw)
            .map_err(|e| self.contextualize(e, prop))?;

        if !self.object_read {
            self.data.insert(prop.to_string(), edit);
            return Ok(());
        }

        if edit == self.current(prop, &ty) {
            return Ok(());
        }

        let empty = self.types.is_empty(&ty, &edit);

        if self.schema.is_unique(prop) && !empty {
            if let Some(backend) = &self.backend {
                let storage = self.types.encode(&ty, &edit);
                if !backend.is_value_unique(prop, &storage, self.id)? {
                    let err: ExError = MapError::DuplicateValue {
                        prop: prop.to_string(),
                        value: storage.to_text(),
                    }
                    .into();
                    return Err(self.contextualize(err, prop));
                }
            }
        }

        if self.schema.is_required(prop) && empty {
            let err: ExError = MapError::MissingRequired {
                prop: prop.to_string(),
            }
            .into();
            return Err(self.contextualize(err, prop));
        }

        self.types
            .validate(&ty, prop, &edit)
            .map_err(|e| self.contextualize(e, prop))?;

        if edit == self.persisted(prop, &ty) {
            self.changes.remove(prop);
        } else {
            tracing::debug!(
                entity_type = %self.schema.entity_type,
                entity_id = self.id,
                prop,
                "change recorded"
            );
            self.changes.insert(prop.to_string(), edit);
        }
        Ok(())
    }

    /// Write several properties, attempting every one
    ///
    /// # Errors
    ///
    /// Returns the failure of each property that could not be set, keyed by
    /// property name. Properties that succeeded stay set.
    pub fn set_props<I, K, V>(&mut self, props: I) -> std::result::Result<(), BTreeMap<String, ExError>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut errors = BTreeMap::new();
        for (prop, value) in props {
            let prop = prop.into();
            if errors.contains_key(&prop) {
                continue;
            }
            if let Err(err) = self.set(&prop, value) {
                errors.insert(prop, err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Pending changes (edit representation)
    pub fn get_changes(&self) -> &BTreeMap<String, Value> {
        &self.changes
    }

    pub fn is_changed(&self, prop: &str) -> bool {
        self.changes.contains_key(prop)
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Merge pending changes into the persisted data
    pub fn apply_changes(&mut self) {
        let changes = std::mem::take(&mut self.changes);
        self.data.extend(changes);
    }

    /// Discard pending changes
    pub fn discard_changes(&mut self) {
        self.changes.clear();
    }

    /// Every declared property with its current edit value
    pub fn get_data(&self) -> BTreeMap<String, Value> {
        self.schema
            .prop_names()
            .filter_map(|prop| {
                let ty = self.schema.semantic_type(prop)?;
                Some((prop.to_string(), self.current(prop, &ty)))
            })
            .collect()
    }

    /// Persist through the attached backend: create when new, else update
    ///
    /// # Errors
    ///
    /// `Internal` if no backend is attached; otherwise whatever the backend
    /// reports.
    pub fn save(&mut self) -> Result<i64> {
        let backend = self.backend.clone().ok_or_else(|| {
            ExError::from(MapError::Unbound {
                entity_type: self.schema.entity_type.clone(),
            })
        })?;
        if self.id > 0 {
            backend.update(self)?;
        } else {
            backend.create(self)?;
        }
        Ok(self.id)
    }
}
