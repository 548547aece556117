//! Store schema migrations
//!
//! SQL files under `migrations/` are embedded at compile time and applied in
//! id order. Each applied migration is recorded in `schema_version` with a
//! SHA-256 of its SQL; a recorded checksum that no longer matches aborts the
//! run. Entity row and meta tables are not migrations: they follow the
//! registered schemas (see [`crate::ddl`]).

mod embedded;
mod runner;

pub use embedded::{Migration, MIGRATIONS};
pub use runner::{applied_migrations, apply_migrations, pending_migrations, AppliedMigration};
