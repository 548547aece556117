//! Connection setup
//!
//! Opens SQLite stores ready for repositories: pragmas applied, taxonomy
//! migrations run, and a [`Host`] wired over the connection.

use crate::config::StoreConfig;
use crate::errors::{from_rusqlite, Result};
use crate::host::Host;
use crate::migrations::apply_migrations;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) a store file and bring its schema up to date
///
/// # Errors
///
/// Returns a persistence error if the file cannot be opened, a pragma fails
/// or a migration fails.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let mut conn = Connection::open(path.as_ref()).map_err(from_rusqlite)?;
    configure(&conn)?;
    apply_migrations(&mut conn)?;
    tracing::debug!(path = %path.as_ref().display(), "store opened");
    Ok(conn)
}

/// In-memory store with migrations applied
///
/// # Errors
///
/// Returns a persistence error if SQLite cannot allocate the database or a
/// migration fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().map_err(from_rusqlite)?;
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(from_rusqlite)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

/// Pragmas for file-backed stores
///
/// # Errors
///
/// Returns a persistence error if a pragma fails.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(from_rusqlite)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(from_rusqlite)?;

    // journal_mode returns a row, so it cannot go through execute()
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .map_err(from_rusqlite)?;

    Ok(())
}

/// Open a store file and wrap it in a [`Host`] using the configured
/// taxonomy tables
///
/// # Errors
///
/// As [`open`].
pub fn open_host<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<Host> {
    Ok(Host::sqlite_with_tables(open(path)?, config.taxonomy.clone()))
}
