//! Entimap Store - split-storage persistence and queries over SQLite
//!
//! Provides:
//! - Host collaborators: statement executor, grouped cache, taxonomy service
//! - Meta side-table store and entity table DDL
//! - Repository layer persisting entities across row, meta and term stores
//! - Query engine with pluggable clause parsers, pagination and result cache
//! - YAML schema files and store config

pub mod config;
pub mod db;
pub mod ddl;
pub mod errors;
pub mod host;
pub mod meta_store;
pub mod migrations;
pub mod query;
pub mod repo;
pub mod schema_file;
pub mod sql;

// Re-export key types
pub use config::{PaginationConfig, SearchConfig, SortOrder, StoreConfig, TaxonomyTables};
pub use errors::Result;
pub use host::{CacheBackend, Executor, Host, MemoryCache, Row, SqlTaxonomy, SqliteExecutor, TaxonomyService};
pub use meta_store::MetaStore;
pub use query::{BuiltQuery, Fields, QueryEngine, QueryObjects, QueryResult, QueryVars};
pub use repo::{DerivedStore, Repository, RepositoryRegistry};
