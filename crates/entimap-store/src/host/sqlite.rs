//! SQLite statement executor

use super::{Executor, Row};
use crate::errors::{from_rusqlite, Result};
use entimap_core::SqlValue;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

/// [`Executor`] over a single rusqlite connection
///
/// Not thread-safe; one executor per worker.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }
}

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(n) => SqliteValue::Integer(*n),
        SqlValue::Real(f) => SqliteValue::Real(*f),
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Blob(b) => SqliteValue::Blob(b.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(n) => SqlValue::Integer(n),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

impl Executor for SqliteExecutor {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        tracing::debug!(sql, param_count = params.len(), "query");
        let mut stmt = self.conn.prepare_cached(sql).map_err(from_rusqlite)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(from_rusqlite)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(from_rusqlite)? {
            let mut record = Row::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index).map_err(from_rusqlite)?;
                record.push(column.clone(), from_sqlite(value));
            }
            out.push(record);
        }
        tracing::debug!(row_count = out.len(), "query done");
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        tracing::debug!(sql, param_count = params.len(), "execute");
        let mut stmt = self.conn.prepare_cached(sql).map_err(from_rusqlite)?;
        stmt.execute(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(from_rusqlite)
    }

    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }
}
