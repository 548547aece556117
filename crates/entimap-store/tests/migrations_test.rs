// Integration tests for the embedded taxonomy migrations

use entimap_store::migrations::{applied_migrations, apply_migrations, pending_migrations, MIGRATIONS};
use rusqlite::Connection;

fn table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap();
    names
}

#[test]
fn test_taxonomy_tables_created() {
    let mut conn = Connection::open_in_memory().unwrap();

    apply_migrations(&mut conn).unwrap();

    let tables = table_names(&conn);
    for table in ["schema_version", "terms", "term_taxonomy", "term_relationships"] {
        assert!(tables.iter().any(|t| t == table), "missing table {}", table);
    }
}

#[test]
fn test_rerun_records_each_migration_once() {
    // Given: A database that is already current
    let mut conn = Connection::open_in_memory().unwrap();
    apply_migrations(&mut conn).unwrap();

    // When: The migrations run again
    apply_migrations(&mut conn).unwrap();

    // Then: One version row per embedded migration, each with its checksum
    let applied = applied_migrations(&conn).unwrap();
    assert_eq!(applied.len(), MIGRATIONS.len());
    for (record, migration) in applied.iter().zip(MIGRATIONS) {
        assert_eq!(record.id, migration.id);
        assert_eq!(record.checksum.as_deref(), Some(migration.checksum().as_str()));
    }
}

#[test]
fn test_term_relationships_cascade_with_taxonomy() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
    apply_migrations(&mut conn).unwrap();

    conn.execute("INSERT INTO terms (name, slug) VALUES ('Kitchen', 'kitchen')", [])
        .unwrap();
    conn.execute("INSERT INTO term_taxonomy (term_id, taxonomy) VALUES (1, 'product_tag')", [])
        .unwrap();
    conn.execute(
        "INSERT INTO term_relationships (object_id, term_taxonomy_id) VALUES (7, 1)",
        [],
    )
    .unwrap();

    conn.execute("DELETE FROM terms WHERE term_id = 1", []).unwrap();

    let left: i64 = conn
        .query_row("SELECT COUNT(*) FROM term_relationships", [], |row| row.get(0))
        .unwrap();
    assert_eq!(left, 0);
}

#[test]
fn test_reopened_file_has_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entimap.db");
    drop(entimap_store::db::open(&path).unwrap());

    let conn = Connection::open(&path).unwrap();

    assert!(pending_migrations(&conn).unwrap().is_empty());
    assert_eq!(applied_migrations(&conn).unwrap()[0].id, "001_taxonomy");
}
