//! Applies embedded migrations against a SQLite connection

use super::embedded::{Migration, MIGRATIONS};
use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use rusqlite::{params, Connection, OptionalExtension};

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    migration_id TEXT NOT NULL UNIQUE,
    applied_at INTEGER NOT NULL,
    checksum TEXT
)";

/// A row of `schema_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub id: String,
    pub applied_at: i64,
    pub checksum: Option<String>,
}

/// Bring the connection up to the latest migration
///
/// # Errors
///
/// Returns a persistence error if a migration fails, or if an applied
/// migration's recorded checksum no longer matches its SQL.
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute(VERSION_TABLE_SQL, []).map_err(from_rusqlite)?;
    let mut applied = 0usize;
    for migration in MIGRATIONS {
        if apply_one(conn, migration)? {
            applied += 1;
        }
    }
    if applied > 0 {
        tracing::debug!(applied, "migrations applied");
    }
    Ok(())
}

/// Recorded migrations, in application order
///
/// # Errors
///
/// Returns a persistence error if the version table cannot be read.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    conn.execute(VERSION_TABLE_SQL, []).map_err(from_rusqlite)?;
    let mut stmt = conn
        .prepare("SELECT migration_id, applied_at, checksum FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                id: row.get(0)?,
                applied_at: row.get(1)?,
                checksum: row.get(2)?,
            })
        })
        .map_err(from_rusqlite)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)
}

/// Embedded migrations not yet recorded
///
/// # Errors
///
/// As [`applied_migrations`].
pub fn pending_migrations(conn: &Connection) -> Result<Vec<&'static str>> {
    let applied = applied_migrations(conn)?;
    Ok(MIGRATIONS
        .iter()
        .map(|m| m.id)
        .filter(|id| !applied.iter().any(|a| a.id == *id))
        .collect())
}

/// Apply one migration in its own transaction; `false` if already recorded
fn apply_one(conn: &mut Connection, migration: &Migration) -> Result<bool> {
    let checksum = migration.checksum();
    let recorded: Option<Option<String>> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?",
            [migration.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    match recorded {
        Some(Some(expected)) if expected != checksum => {
            return Err(checksum_mismatch(migration.id, &expected, &checksum));
        }
        Some(_) => return Ok(false),
        None => {}
    }

    let tx = conn.transaction().map_err(from_rusqlite)?;
    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?, ?, ?)",
        params![migration.id, chrono::Utc::now().timestamp(), checksum],
    )
    .map_err(from_rusqlite)?;
    tx.commit().map_err(from_rusqlite)?;

    tracing::debug!(migration_id = migration.id, "migration applied");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_has_nothing_pending_after_apply() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(pending_migrations(&conn).unwrap(), vec!["001_taxonomy"]);
        apply_migrations(&mut conn).unwrap();
        assert!(pending_migrations(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_checksum_detected() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn.execute(
            "UPDATE schema_version SET checksum = 'deadbeef' WHERE migration_id = '001_taxonomy'",
            [],
        )
        .unwrap();
        let err = apply_migrations(&mut conn).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_missing_checksum_is_accepted() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn.execute("UPDATE schema_version SET checksum = NULL", [])
            .unwrap();
        apply_migrations(&mut conn).unwrap();
        assert_eq!(applied_migrations(&conn).unwrap()[0].checksum, None);
    }
}
