// Shared fixtures for store integration tests
#![allow(dead_code)]

use entimap_core::schema::SchemaRegistry;
use entimap_core::{Context, Entity, SqlValue, Value};
use entimap_store::host::{Executor, Row};
use entimap_store::{Host, MemoryCache, RepositoryRegistry, Result, SqlTaxonomy, SqliteExecutor, StoreConfig};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Executor that records every statement it runs
pub struct RecordingExecutor {
    inner: SqliteExecutor,
    statements: RefCell<Vec<String>>,
}

impl RecordingExecutor {
    pub fn statements(&self) -> Vec<String> {
        self.statements.borrow().clone()
    }

    pub fn clear(&self) {
        self.statements.borrow_mut().clear();
    }

    fn record(&self, sql: &str) {
        self.statements.borrow_mut().push(sql.to_string());
    }
}

impl Executor for RecordingExecutor {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.record(sql);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.record(sql);
        self.inner.execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        self.record(sql);
        self.inner.insert(sql, params)
    }
}

pub struct Fixture {
    pub registry: RepositoryRegistry,
    pub db: Rc<RecordingExecutor>,
    pub terms: SqlTaxonomy,
}

/// Catalog schema and store config from fixtures over an in-memory store
pub fn setup() -> Fixture {
    let config = StoreConfig::from_path(&fixtures_dir().join("store.yaml")).unwrap();
    let conn = entimap_store::db::open_in_memory().unwrap();
    let db = Rc::new(RecordingExecutor {
        inner: SqliteExecutor::new(conn),
        statements: RefCell::new(Vec::new()),
    });
    let exec: Rc<dyn Executor> = db.clone();
    let host = Host::new(
        Rc::clone(&exec),
        Rc::new(MemoryCache::new()),
        Rc::new(SqlTaxonomy::new(Rc::clone(&exec), config.taxonomy.clone())),
    );
    let terms = SqlTaxonomy::new(exec, config.taxonomy.clone());

    let mut schemas = SchemaRegistry::new();
    entimap_store::schema_file::load_into(&fixtures_dir().join("catalog.yaml"), &mut schemas).unwrap();
    let registry = RepositoryRegistry::new(schemas, host, config);
    registry.install_tables().unwrap();
    db.clear();

    Fixture { registry, db, terms }
}

/// Create a product from (prop, value) pairs
pub fn create_product(fixture: &Fixture, props: &[(&str, Value)]) -> Entity {
    let repo = fixture.registry.get("product").unwrap();
    let mut entity = repo.new_entity();
    for (prop, value) in props {
        entity.set(prop, value.clone()).unwrap();
    }
    entity.save().unwrap();
    entity
}

pub fn text(entity: &Entity, prop: &str) -> String {
    entity.get(prop, Context::Edit).unwrap().to_text()
}
