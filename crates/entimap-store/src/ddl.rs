//! Table installation from an entity schema
//!
//! Creates the entity's row table and, when declared, its meta table. Both
//! statements are `IF NOT EXISTS`, so installing twice is harmless.

use crate::errors::Result;
use crate::host::Executor;
use crate::meta_store::{META_ID, META_KEY, META_OBJECT_ID, META_VALUE};
use crate::sql::quote_ident;
use entimap_core::{EntitySchema, SemanticType};

/// SQLite column affinity for a semantic type
pub fn column_affinity(semantic_type: &SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::Int | SemanticType::BoolAsInt | SemanticType::TermRefSingle => "INTEGER",
        SemanticType::Float => "REAL",
        SemanticType::BinaryHex => "BLOB",
        _ => "TEXT",
    }
}

/// `CREATE TABLE` statement for the row table
pub fn row_table_sql(schema: &EntitySchema) -> String {
    let mut columns = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT",
        quote_ident(&schema.id_field)
    )];
    for column in schema.columns.values() {
        columns.push(format!(
            "{} {}",
            quote_ident(&column.storage_name),
            column_affinity(&column.semantic_type)
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&schema.table),
        columns.join(", ")
    )
}

/// `CREATE TABLE` statement for a meta table
pub fn meta_table_sql(meta_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, \
         {} INTEGER NOT NULL, {} TEXT NOT NULL, {})",
        quote_ident(meta_table),
        quote_ident(META_ID),
        quote_ident(META_OBJECT_ID),
        quote_ident(META_KEY),
        quote_ident(META_VALUE),
    )
}

/// Create the tables (and lookup indexes) an entity schema needs
///
/// # Errors
///
/// Returns a persistence error if a statement fails.
pub fn install_entity_tables(db: &dyn Executor, schema: &EntitySchema) -> Result<()> {
    db.execute(&row_table_sql(schema), &[])?;

    for column in schema.columns.values().filter(|c| c.unique) {
        db.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("idx_{}_{}", schema.table, column.storage_name)),
                quote_ident(&schema.table),
                quote_ident(&column.storage_name)
            ),
            &[],
        )?;
    }

    if let Some(meta_table) = &schema.meta_table {
        db.execute(&meta_table_sql(meta_table), &[])?;
        db.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {})",
                quote_ident(&format!("idx_{}_object_key", meta_table)),
                quote_ident(meta_table),
                quote_ident(META_OBJECT_ID),
                quote_ident(META_KEY)
            ),
            &[],
        )?;
        db.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("idx_{}_key", meta_table)),
                quote_ident(meta_table),
                quote_ident(META_KEY)
            ),
            &[],
        )?;
    }

    tracing::debug!(entity_type = %schema.entity_type, table = %schema.table, "entity tables installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SqliteExecutor;
    use entimap_core::{ColumnDef, MetaDef};
    use rusqlite::Connection;

    fn schema() -> EntitySchema {
        EntitySchema::builder("product", "products")
            .meta_table("product_meta")
            .column("name", ColumnDef::new("name", SemanticType::String).unique())
            .column("stock", ColumnDef::new("stock_qty", SemanticType::Int))
            .column("thumb", ColumnDef::new("thumb", SemanticType::BinaryHex))
            .meta("color", MetaDef::new("_color", SemanticType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn test_row_table_sql() {
        let sql = row_table_sql(&schema());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"products\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"stock_qty\" INTEGER"));
        assert!(sql.contains("\"thumb\" BLOB"));
    }

    #[test]
    fn test_install_is_idempotent() {
        let db = SqliteExecutor::new(Connection::open_in_memory().unwrap());
        install_entity_tables(&db, &schema()).unwrap();
        install_entity_tables(&db, &schema()).unwrap();
        let tables = db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('products', 'product_meta')",
                &[],
            )
            .unwrap();
        assert_eq!(tables.len(), 2);
    }
}
