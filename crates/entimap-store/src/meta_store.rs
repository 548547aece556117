//! Meta Store
//!
//! Key/value rows in a side table, keyed by owning object id. Knows nothing
//! about entity types or semantic types: values go in and come out as
//! storage scalars.

use crate::errors::Result;
use crate::host::Executor;
use crate::sql::{placeholders, quote_ident};
use entimap_core::SqlValue;
use std::collections::BTreeMap;
use std::rc::Rc;

pub const META_ID: &str = "meta_id";
pub const META_OBJECT_ID: &str = "object_id";
pub const META_KEY: &str = "meta_key";
pub const META_VALUE: &str = "meta_value";

pub struct MetaStore {
    db: Rc<dyn Executor>,
    table: String,
    owner: Option<(String, String)>,
}

impl MetaStore {
    pub fn new(db: Rc<dyn Executor>, table: &str) -> Self {
        Self {
            db,
            table: quote_ident(table),
            owner: None,
        }
    }

    /// Restrict value counting to objects that still have a row in `table`
    pub fn with_owner(mut self, table: &str, id_field: &str) -> Self {
        self.owner = Some((quote_ident(table), quote_ident(id_field)));
        self
    }

    /// Single value; the most recent row wins when a key repeats
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn get(&self, object_id: i64, key: &str) -> Result<Option<SqlValue>> {
        self.db.query_scalar(
            &format!(
                "SELECT meta_value FROM {} WHERE object_id = ? AND meta_key = ? \
                 ORDER BY meta_id DESC LIMIT 1",
                self.table
            ),
            &[SqlValue::Integer(object_id), SqlValue::from(key)],
        )
    }

    /// Values for the given keys; missing keys are absent from the map
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn get_many(&self, object_id: i64, keys: &[&str]) -> Result<BTreeMap<String, SqlValue>> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut params = vec![SqlValue::Integer(object_id)];
        params.extend(keys.iter().map(|k| SqlValue::from(*k)));
        let rows = self.db.query(
            &format!(
                "SELECT meta_key, meta_value FROM {} WHERE object_id = ? AND meta_key IN ({}) \
                 ORDER BY meta_id",
                self.table,
                placeholders(keys.len())
            ),
            &params,
        )?;
        tracing::debug!(object_id, key_count = keys.len(), row_count = rows.len(), "meta bulk read");
        Ok(collect_pairs(rows))
    }

    /// Every key/value row of an object
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn get_all(&self, object_id: i64) -> Result<BTreeMap<String, SqlValue>> {
        let rows = self.db.query(
            &format!(
                "SELECT meta_key, meta_value FROM {} WHERE object_id = ? ORDER BY meta_id",
                self.table
            ),
            &[SqlValue::Integer(object_id)],
        )?;
        Ok(collect_pairs(rows))
    }

    /// Insert a row unconditionally; returns the meta id
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the insert fails.
    pub fn add(&self, object_id: i64, key: &str, value: &SqlValue) -> Result<i64> {
        self.db.insert(
            &format!(
                "INSERT INTO {} (object_id, meta_key, meta_value) VALUES (?, ?, ?)",
                self.table
            ),
            &[SqlValue::Integer(object_id), SqlValue::from(key), value.clone()],
        )
    }

    /// Update the key's rows, inserting one if none exist
    ///
    /// # Errors
    ///
    /// Returns a persistence error if a statement fails.
    pub fn update(&self, object_id: i64, key: &str, value: &SqlValue) -> Result<()> {
        let affected = self.db.execute(
            &format!(
                "UPDATE {} SET meta_value = ? WHERE object_id = ? AND meta_key = ?",
                self.table
            ),
            &[value.clone(), SqlValue::Integer(object_id), SqlValue::from(key)],
        )?;
        if affected == 0 {
            self.add(object_id, key, value)?;
        }
        tracing::debug!(object_id, meta_key = key, inserted = affected == 0, "meta upsert");
        Ok(())
    }

    /// Upsert several keys
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing write.
    pub fn bulk_update(&self, object_id: i64, entries: &[(String, SqlValue)]) -> Result<()> {
        for (key, value) in entries {
            self.update(object_id, key, value)?;
        }
        Ok(())
    }

    /// Remove a key; returns the number of rows removed
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    pub fn delete(&self, object_id: i64, key: &str) -> Result<usize> {
        self.db.execute(
            &format!("DELETE FROM {} WHERE object_id = ? AND meta_key = ?", self.table),
            &[SqlValue::Integer(object_id), SqlValue::from(key)],
        )
    }

    /// Remove several keys in one statement
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    pub fn bulk_delete(&self, object_id: i64, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut params = vec![SqlValue::Integer(object_id)];
        params.extend(keys.iter().map(|k| SqlValue::from(*k)));
        self.db.execute(
            &format!(
                "DELETE FROM {} WHERE object_id = ? AND meta_key IN ({})",
                self.table,
                placeholders(keys.len())
            ),
            &params,
        )
    }

    /// Remove every row of an object
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the delete fails.
    pub fn delete_all(&self, object_id: i64) -> Result<usize> {
        self.db.execute(
            &format!("DELETE FROM {} WHERE object_id = ?", self.table),
            &[SqlValue::Integer(object_id)],
        )
    }

    /// Number of objects other than `exclude_id` holding `value` under `key`
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the query fails.
    pub fn count_value(&self, key: &str, value: &SqlValue, exclude_id: i64) -> Result<i64> {
        let sql = match &self.owner {
            Some((table, id_field)) => format!(
                "SELECT COUNT(DISTINCT m.object_id) FROM {} m INNER JOIN {} o ON o.{} = m.object_id \
                 WHERE m.meta_key = ? AND m.meta_value = ? AND m.object_id <> ?",
                self.table, table, id_field
            ),
            None => format!(
                "SELECT COUNT(DISTINCT m.object_id) FROM {} m \
                 WHERE m.meta_key = ? AND m.meta_value = ? AND m.object_id <> ?",
                self.table
            ),
        };
        let count = self.db.query_scalar(
            &sql,
            &[SqlValue::from(key), value.clone(), SqlValue::Integer(exclude_id)],
        )?;
        Ok(count.and_then(|v| v.as_i64()).unwrap_or(0))
    }
}

fn collect_pairs(rows: Vec<crate::host::Row>) -> BTreeMap<String, SqlValue> {
    let mut out = BTreeMap::new();
    for row in rows {
        if let (Some(SqlValue::Text(key)), Some(value)) = (row.value(0), row.value(1)) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}
