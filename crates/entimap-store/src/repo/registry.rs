//! Repository registry
//!
//! Context object holding the schema registry, host collaborators, config
//! and type registry. Repositories are created on first use and shared
//! afterwards.

use crate::config::StoreConfig;
use crate::ddl::install_entity_tables;
use crate::errors::Result;
use crate::host::Host;
use crate::query::{QueryEngine, QueryResult, QueryVars};
use crate::repo::Repository;
use entimap_core::schema::SchemaRegistry;
use entimap_core::TypeRegistry;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub struct RepositoryRegistry {
    schemas: SchemaRegistry,
    types: Rc<TypeRegistry>,
    host: Host,
    config: Rc<StoreConfig>,
    repositories: RefCell<BTreeMap<String, Rc<Repository>>>,
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("entity_types", &self.schemas.entity_types().collect::<Vec<_>>())
            .field("loaded", &self.repositories.borrow().len())
            .finish()
    }
}

impl RepositoryRegistry {
    pub fn new(schemas: SchemaRegistry, host: Host, config: StoreConfig) -> Self {
        Self {
            schemas,
            types: Rc::new(TypeRegistry::new()),
            host,
            config: Rc::new(config),
            repositories: RefCell::new(BTreeMap::new()),
        }
    }

    /// Use a type registry carrying extension handlers
    pub fn with_types(mut self, types: TypeRegistry) -> Self {
        self.types = Rc::new(types);
        self.repositories.borrow_mut().clear();
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The repository for an entity type, creating it on first request
    ///
    /// # Errors
    ///
    /// `SchemaInvalid` if the entity type is not registered.
    pub fn get(&self, entity_type: &str) -> Result<Rc<Repository>> {
        if let Some(repo) = self.repositories.borrow().get(entity_type) {
            return Ok(Rc::clone(repo));
        }
        let schema = self.schemas.get(entity_type)?;
        let repo = Rc::new(Repository::new(
            schema,
            Rc::clone(&self.types),
            self.host.clone(),
            Rc::clone(&self.config),
        ));
        tracing::debug!(entity_type, "repository created");
        self.repositories
            .borrow_mut()
            .insert(entity_type.to_string(), Rc::clone(&repo));
        Ok(repo)
    }

    /// Run a query against an entity type
    ///
    /// # Errors
    ///
    /// As [`RepositoryRegistry::get`] and [`QueryEngine::query`].
    pub fn query(&self, entity_type: &str, vars: &QueryVars) -> Result<QueryResult> {
        QueryEngine::new(self.get(entity_type)?).query(vars)
    }

    /// Create the row and meta tables of every registered entity type
    ///
    /// # Errors
    ///
    /// Returns a persistence error if a statement fails.
    pub fn install_tables(&self) -> Result<()> {
        for entity_type in self.schemas.entity_types() {
            let schema = self.schemas.get(entity_type)?;
            install_entity_tables(self.host.db.as_ref(), &schema)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_core::schema::{ColumnDef, EntitySchema, SemanticType};
    use entimap_core::ExErrorKind;
    use rusqlite::Connection;

    fn registry() -> RepositoryRegistry {
        let mut schemas = SchemaRegistry::new();
        schemas
            .register(
                EntitySchema::builder("note", "notes")
                    .column("title", ColumnDef::new("title", SemanticType::String))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        crate::migrations::apply_migrations(&mut conn).unwrap();
        RepositoryRegistry::new(schemas, Host::sqlite(conn), StoreConfig::default())
    }

    #[test]
    fn test_repository_is_created_once() {
        let registry = registry();
        let first = registry.get("note").unwrap();
        let second = registry.get("note").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_entity_type() {
        let err = registry().get("ghost").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::SchemaInvalid);
    }

    #[test]
    fn test_install_tables_then_save() {
        let registry = registry();
        registry.install_tables().unwrap();
        registry.install_tables().unwrap();
        let repo = registry.get("note").unwrap();
        let mut note = repo.new_entity();
        note.set("title", "hello").unwrap();
        assert!(note.save().unwrap() > 0);
    }
}
