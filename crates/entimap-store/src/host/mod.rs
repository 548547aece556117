//! Host collaborators
//!
//! The mapping layer never talks to a database, cache or taxonomy store
//! directly. It goes through the narrow interfaces defined here, bundled in
//! a [`Host`] context object. SQLite and in-memory implementations are
//! provided for embedding and tests.

pub mod memory_cache;
pub mod sqlite;
pub mod taxonomy;

use crate::config::TaxonomyTables;
use crate::errors::Result;
use entimap_core::SqlValue;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub use memory_cache::MemoryCache;
pub use sqlite::SqliteExecutor;
pub use taxonomy::SqlTaxonomy;

/// One result row: column names with their values, in select order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.push((column.into(), value));
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value.into());
        self
    }

    /// Value of a named column
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Value at a select position
    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Parameterized statement execution
///
/// Parameters bind positionally to `?` placeholders.
pub trait Executor {
    /// Run a query and collect every row
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the statement fails.
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the statement fails.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Run an insert and return the new row id
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the statement fails.
    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64>;

    /// First column of the first row, if any
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the statement fails.
    fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let rows = self.query(sql, params)?;
        Ok(rows.first().and_then(|row| row.value(0)).cloned())
    }
}

/// Grouped key/value cache with per-group generation counters
///
/// Bumping a group's generation invalidates every key derived from it.
pub trait CacheBackend {
    fn get(&self, key: &str, group: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value, group: &str);
    fn delete(&self, key: &str, group: &str);
    fn generation(&self, group: &str) -> u64;
    /// Advance the generation and return the new value
    fn bump_generation(&self, group: &str) -> u64;
}

/// Term associations of entity rows
pub trait TaxonomyService {
    /// Term ids attached to an object, in attachment order
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the lookup fails.
    fn get_terms(&self, object_id: i64, taxonomy: &str) -> Result<Vec<i64>>;

    /// Attach terms, replacing existing ones unless `append`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for term ids not in the taxonomy, or a
    /// persistence error.
    fn set_terms(&self, object_id: i64, term_ids: &[i64], taxonomy: &str, append: bool)
        -> Result<()>;

    /// Drop every association of an object in the given taxonomies
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    fn delete_relationships(&self, object_id: i64, taxonomies: &[&str]) -> Result<()>;
}

/// Dependency container handed to repositories and queries
#[derive(Clone)]
pub struct Host {
    pub db: Rc<dyn Executor>,
    pub cache: Rc<dyn CacheBackend>,
    pub taxonomy: Rc<dyn TaxonomyService>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

impl Host {
    pub fn new(
        db: Rc<dyn Executor>,
        cache: Rc<dyn CacheBackend>,
        taxonomy: Rc<dyn TaxonomyService>,
    ) -> Self {
        Self {
            db,
            cache,
            taxonomy,
        }
    }

    /// SQLite executor and taxonomy over one connection, with an in-memory cache
    pub fn sqlite(conn: Connection) -> Self {
        Self::sqlite_with_tables(conn, TaxonomyTables::default())
    }

    pub fn sqlite_with_tables(conn: Connection, tables: TaxonomyTables) -> Self {
        let db: Rc<dyn Executor> = Rc::new(SqliteExecutor::new(conn));
        let taxonomy = Rc::new(SqlTaxonomy::new(Rc::clone(&db), tables));
        Self {
            db,
            cache: Rc::new(MemoryCache::new()),
            taxonomy,
        }
    }
}
