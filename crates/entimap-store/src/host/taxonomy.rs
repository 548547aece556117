//! SQL-backed taxonomy service over the migration 001 tables

use super::{Executor, TaxonomyService};
use crate::config::TaxonomyTables;
use crate::errors::Result;
use crate::sql::{placeholders, quote_ident};
use entimap_core::errors::MapError;
use entimap_core::property::types::slugify;
use entimap_core::SqlValue;
use std::rc::Rc;

pub struct SqlTaxonomy {
    db: Rc<dyn Executor>,
    terms: String,
    term_taxonomy: String,
    term_relationships: String,
}

impl SqlTaxonomy {
    pub fn new(db: Rc<dyn Executor>, tables: TaxonomyTables) -> Self {
        Self {
            db,
            terms: quote_ident(&tables.terms),
            term_taxonomy: quote_ident(&tables.term_taxonomy),
            term_relationships: quote_ident(&tables.term_relationships),
        }
    }

    /// Create a term in a taxonomy, or return the existing one with that slug
    ///
    /// An empty slug is derived from the name.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if an insert fails.
    pub fn insert_term(&self, name: &str, slug: &str, taxonomy: &str) -> Result<i64> {
        let slug = if slug.trim().is_empty() {
            slugify(name)
        } else {
            slug.to_string()
        };

        let existing = self.db.query_scalar(
            &format!(
                "SELECT t.term_id FROM {} t JOIN {} tt ON tt.term_id = t.term_id \
                 WHERE tt.taxonomy = ? AND t.slug = ?",
                self.terms, self.term_taxonomy
            ),
            &[SqlValue::from(taxonomy), SqlValue::from(slug.as_str())],
        )?;
        if let Some(term_id) = existing.and_then(|v| v.as_i64()) {
            return Ok(term_id);
        }

        let term_id = self.db.insert(
            &format!("INSERT INTO {} (name, slug) VALUES (?, ?)", self.terms),
            &[SqlValue::from(name), SqlValue::from(slug)],
        )?;
        self.db.insert(
            &format!(
                "INSERT INTO {} (term_id, taxonomy, count) VALUES (?, ?, 0)",
                self.term_taxonomy
            ),
            &[SqlValue::Integer(term_id), SqlValue::from(taxonomy)],
        )?;
        tracing::debug!(term_id, taxonomy, "term inserted");
        Ok(term_id)
    }

    /// Number of objects attached to a term
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the lookup fails.
    pub fn term_count(&self, term_id: i64, taxonomy: &str) -> Result<i64> {
        let count = self.db.query_scalar(
            &format!(
                "SELECT count FROM {} WHERE term_id = ? AND taxonomy = ?",
                self.term_taxonomy
            ),
            &[SqlValue::Integer(term_id), SqlValue::from(taxonomy)],
        )?;
        Ok(count.and_then(|v| v.as_i64()).unwrap_or(0))
    }

    fn term_taxonomy_id(&self, term_id: i64, taxonomy: &str) -> Result<Option<i64>> {
        let id = self.db.query_scalar(
            &format!(
                "SELECT term_taxonomy_id FROM {} WHERE term_id = ? AND taxonomy = ?",
                self.term_taxonomy
            ),
            &[SqlValue::Integer(term_id), SqlValue::from(taxonomy)],
        )?;
        Ok(id.and_then(|v| v.as_i64()))
    }

    fn recount(&self, taxonomies: &[&str]) -> Result<()> {
        if taxonomies.is_empty() {
            return Ok(());
        }
        let params: Vec<SqlValue> = taxonomies.iter().map(|t| SqlValue::from(*t)).collect();
        self.db.execute(
            &format!(
                "UPDATE {tt} SET count = (SELECT COUNT(*) FROM {tr} tr \
                 WHERE tr.term_taxonomy_id = {tt}.term_taxonomy_id) \
                 WHERE taxonomy IN ({})",
                placeholders(params.len()),
                tt = self.term_taxonomy,
                tr = self.term_relationships,
            ),
            &params,
        )?;
        Ok(())
    }
}

impl TaxonomyService for SqlTaxonomy {
    fn get_terms(&self, object_id: i64, taxonomy: &str) -> Result<Vec<i64>> {
        let rows = self.db.query(
            &format!(
                "SELECT tt.term_id FROM {} tr JOIN {} tt ON tt.term_taxonomy_id = tr.term_taxonomy_id \
                 WHERE tr.object_id = ? AND tt.taxonomy = ? ORDER BY tr.term_order, tt.term_id",
                self.term_relationships, self.term_taxonomy
            ),
            &[SqlValue::Integer(object_id), SqlValue::from(taxonomy)],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.value(0).and_then(SqlValue::as_i64))
            .collect())
    }

    fn set_terms(
        &self,
        object_id: i64,
        term_ids: &[i64],
        taxonomy: &str,
        append: bool,
    ) -> Result<()> {
        let mut resolved = Vec::with_capacity(term_ids.len());
        for term_id in term_ids {
            let tt_id = self.term_taxonomy_id(*term_id, taxonomy)?.ok_or_else(|| {
                MapError::NotFound {
                    entity_type: format!("term:{}", taxonomy),
                    id: *term_id,
                }
            })?;
            resolved.push(tt_id);
        }

        let mut order = 0;
        if append {
            order = self.get_terms(object_id, taxonomy)?.len() as i64;
        } else {
            self.delete_relationships(object_id, &[taxonomy])?;
        }

        for tt_id in resolved {
            let inserted = self.db.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (object_id, term_taxonomy_id, term_order) VALUES (?, ?, ?)",
                    self.term_relationships
                ),
                &[
                    SqlValue::Integer(object_id),
                    SqlValue::Integer(tt_id),
                    SqlValue::Integer(order),
                ],
            )?;
            order += inserted as i64;
        }

        self.recount(&[taxonomy])?;
        tracing::debug!(object_id, taxonomy, term_count = term_ids.len(), append, "terms set");
        Ok(())
    }

    fn delete_relationships(&self, object_id: i64, taxonomies: &[&str]) -> Result<()> {
        if taxonomies.is_empty() {
            return Ok(());
        }
        let mut params = vec![SqlValue::Integer(object_id)];
        params.extend(taxonomies.iter().map(|t| SqlValue::from(*t)));
        self.db.execute(
            &format!(
                "DELETE FROM {} WHERE object_id = ? AND term_taxonomy_id IN \
                 (SELECT term_taxonomy_id FROM {} WHERE taxonomy IN ({}))",
                self.term_relationships,
                self.term_taxonomy,
                placeholders(taxonomies.len())
            ),
            &params,
        )?;
        self.recount(taxonomies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SqliteExecutor;
    use crate::migrations::apply_migrations;
    use entimap_core::ExErrorKind;
    use rusqlite::Connection;

    fn taxonomy() -> SqlTaxonomy {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        SqlTaxonomy::new(Rc::new(SqliteExecutor::new(conn)), TaxonomyTables::default())
    }

    #[test]
    fn test_insert_term_is_idempotent_per_slug() {
        let tax = taxonomy();
        let a = tax.insert_term("Kitchen Ware", "", "product_cat").unwrap();
        let b = tax.insert_term("Kitchen ware!", "kitchen-ware", "product_cat").unwrap();
        assert_eq!(a, b);
        let c = tax.insert_term("Kitchen Ware", "", "product_tag").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_set_replace_and_append() {
        let tax = taxonomy();
        let red = tax.insert_term("Red", "", "color").unwrap();
        let blue = tax.insert_term("Blue", "", "color").unwrap();

        tax.set_terms(7, &[red], "color", false).unwrap();
        tax.set_terms(7, &[blue], "color", true).unwrap();
        assert_eq!(tax.get_terms(7, "color").unwrap(), vec![red, blue]);

        tax.set_terms(7, &[blue], "color", false).unwrap();
        assert_eq!(tax.get_terms(7, "color").unwrap(), vec![blue]);
        assert_eq!(tax.term_count(red, "color").unwrap(), 0);
        assert_eq!(tax.term_count(blue, "color").unwrap(), 1);
    }

    #[test]
    fn test_unknown_term_rejected() {
        let tax = taxonomy();
        let err = tax.set_terms(1, &[999], "color", false).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
    }

    #[test]
    fn test_delete_relationships_scoped_to_taxonomy() {
        let tax = taxonomy();
        let red = tax.insert_term("Red", "", "color").unwrap();
        let big = tax.insert_term("Big", "", "size").unwrap();
        tax.set_terms(3, &[red], "color", false).unwrap();
        tax.set_terms(3, &[big], "size", false).unwrap();

        tax.delete_relationships(3, &["color"]).unwrap();
        assert!(tax.get_terms(3, "color").unwrap().is_empty());
        assert_eq!(tax.get_terms(3, "size").unwrap(), vec![big]);
    }
}
