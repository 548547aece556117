//! Taxonomy filters
//!
//! `<term_prop>` / `<term_prop>__in`, `__not_in`, `__and` per term-backed
//! property, and `tax_query` clause groups with `taxonomy`, `terms`,
//! `field` and `operator` (`IN`, `NOT IN`, `AND`, `EXISTS`, `NOT EXISTS`).
//! Terms are sanitized per term field; `AND` with fewer than two terms
//! behaves as `IN`.

use crate::config::TaxonomyTables;
use crate::errors::{query_input, Result};
use crate::query::clause::{clause_group, combine, is_leaf, ClauseContext, ClauseParser, Relation, SqlFragment};
use crate::query::vars::{list_items, QueryVars};
use crate::sql::{placeholders, qualified, quote_ident};
use entimap_core::property::types::slugify;
use entimap_core::schema::{EntitySchema, TermField};
use entimap_core::SqlValue;
use serde_json::Value as JsonValue;
use std::rc::Rc;

const LEAF_MARKERS: &[&str] = &["taxonomy", "terms", "operator"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaxOperator {
    In,
    NotIn,
    And,
    Exists,
    NotExists,
}

impl TaxOperator {
    fn parse(op: &str) -> Option<TaxOperator> {
        match op.trim().to_ascii_uppercase().as_str() {
            "IN" => Some(TaxOperator::In),
            "NOT IN" => Some(TaxOperator::NotIn),
            "AND" => Some(TaxOperator::And),
            "EXISTS" => Some(TaxOperator::Exists),
            "NOT EXISTS" => Some(TaxOperator::NotExists),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct TaxLeaf {
    taxonomy: String,
    field: TermField,
    terms: Vec<SqlValue>,
    operator: TaxOperator,
}

#[derive(Debug, Clone)]
enum TaxNode {
    Leaf(TaxLeaf),
    Group(Relation, Vec<TaxNode>),
}

/// Normalize raw terms for a term field, dropping unusable and repeated ones
fn sanitize_terms(field: TermField, raw: &[String]) -> Vec<SqlValue> {
    let mut out: Vec<SqlValue> = Vec::new();
    for term in raw {
        let value = match field {
            TermField::Id => match term.trim().parse::<i64>() {
                Ok(id) if id > 0 => SqlValue::Integer(id),
                _ => continue,
            },
            TermField::Slug => {
                let slug = slugify(term);
                if slug.is_empty() {
                    continue;
                }
                SqlValue::Text(slug)
            }
            TermField::Name => {
                let name = term.trim();
                if name.is_empty() {
                    continue;
                }
                SqlValue::Text(name.to_string())
            }
        };
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

pub struct TaxClause {
    schema: Rc<EntitySchema>,
    tables: TaxonomyTables,
    root: Vec<TaxNode>,
}

impl TaxClause {
    pub fn new(schema: Rc<EntitySchema>, tables: TaxonomyTables) -> Self {
        Self {
            schema,
            tables,
            root: Vec::new(),
        }
    }

    fn leaf(taxonomy: &str, field: TermField, raw: &[String], operator: TaxOperator) -> TaxLeaf {
        let terms = sanitize_terms(field, raw);
        let operator = if operator == TaxOperator::And && terms.len() < 2 {
            TaxOperator::In
        } else {
            operator
        };
        TaxLeaf {
            taxonomy: taxonomy.to_string(),
            field,
            terms,
            operator,
        }
    }

    fn parse_leaf(&self, clause: &JsonValue) -> Result<TaxLeaf> {
        let taxonomy = clause
            .get("taxonomy")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| query_input("tax_query clause needs a taxonomy"))?;
        if !self.schema.taxonomies().contains(&taxonomy) {
            return Err(query_input(format!(
                "taxonomy {} is not mapped by {}",
                taxonomy, self.schema.entity_type
            )));
        }
        let field = match clause.get("field").and_then(JsonValue::as_str) {
            Some(name) => TermField::parse(name)
                .ok_or_else(|| query_input(format!("unknown term field {:?}", name)))?,
            None => TermField::Id,
        };
        let operator = match clause.get("operator").and_then(JsonValue::as_str) {
            Some(op) => TaxOperator::parse(op)
                .ok_or_else(|| query_input(format!("unknown tax operator {:?}", op)))?,
            None => TaxOperator::In,
        };
        let raw = clause.get("terms").map(list_items).unwrap_or_default();
        Ok(Self::leaf(taxonomy, field, &raw, operator))
    }

    fn parse_node(&self, value: &JsonValue, depth: usize) -> Result<TaxNode> {
        if depth > 8 {
            return Err(query_input("tax_query nested too deeply"));
        }
        if is_leaf(value, LEAF_MARKERS) {
            return Ok(TaxNode::Leaf(self.parse_leaf(value)?));
        }
        let (relation, members) = clause_group(value)?;
        let children = members
            .into_iter()
            .map(|(_, member)| self.parse_node(member, depth + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(TaxNode::Group(relation, children))
    }

    /// `FROM ... WHERE` body matching a leaf's terms within its taxonomy
    fn term_source(&self, leaf: &TaxLeaf) -> (String, Vec<SqlValue>) {
        let mut params = vec![SqlValue::Text(leaf.taxonomy.clone())];
        let mut sql = format!(
            "FROM {} tr INNER JOIN {} tt ON tt.term_taxonomy_id = tr.term_taxonomy_id \
             INNER JOIN {} te ON te.term_id = tt.term_id WHERE tt.taxonomy = ?",
            quote_ident(&self.tables.term_relationships),
            quote_ident(&self.tables.term_taxonomy),
            quote_ident(&self.tables.terms)
        );
        if !leaf.terms.is_empty() {
            sql.push_str(&format!(
                " AND te.{} IN ({})",
                quote_ident(leaf.field.column()),
                placeholders(leaf.terms.len())
            ));
            params.extend(leaf.terms.iter().cloned());
        }
        (sql, params)
    }

    fn leaf_sql(&self, leaf: &TaxLeaf, id: &str) -> Option<(String, Vec<SqlValue>)> {
        match leaf.operator {
            TaxOperator::In if leaf.terms.is_empty() => Some(("1 = 0".to_string(), Vec::new())),
            TaxOperator::NotIn | TaxOperator::And if leaf.terms.is_empty() => None,
            TaxOperator::In | TaxOperator::NotIn => {
                let (source, params) = self.term_source(leaf);
                let op = if leaf.operator == TaxOperator::In { "IN" } else { "NOT IN" };
                Some((format!("{} {} (SELECT tr.object_id {})", id, op, source), params))
            }
            TaxOperator::And => {
                let (source, mut params) = self.term_source(leaf);
                params.push(SqlValue::Integer(leaf.terms.len() as i64));
                Some((
                    format!(
                        "(SELECT COUNT(DISTINCT te.term_id) {} AND tr.object_id = {}) = ?",
                        source, id
                    ),
                    params,
                ))
            }
            TaxOperator::Exists | TaxOperator::NotExists => {
                let (source, params) = self.term_source(&TaxLeaf {
                    terms: Vec::new(),
                    ..leaf.clone()
                });
                let not = if leaf.operator == TaxOperator::NotExists { "NOT " } else { "" };
                Some((
                    format!("{}EXISTS (SELECT 1 {} AND tr.object_id = {})", not, source, id),
                    params,
                ))
            }
        }
    }

    fn node_sql(&self, node: &TaxNode, id: &str) -> Option<(String, Vec<SqlValue>)> {
        match node {
            TaxNode::Leaf(leaf) => self.leaf_sql(leaf, id),
            TaxNode::Group(relation, children) => {
                let mut parts = Vec::new();
                let mut params = Vec::new();
                for (sql, child_params) in children.iter().filter_map(|c| self.node_sql(c, id)) {
                    parts.push(sql);
                    params.extend(child_params);
                }
                combine(parts, *relation).map(|sql| (sql, params))
            }
        }
    }
}

impl ClauseParser for TaxClause {
    fn name(&self) -> &'static str {
        "tax"
    }

    fn parse(&mut self, vars: &QueryVars) -> Result<()> {
        let mut nodes = Vec::new();
        for (prop, def) in &self.schema.term_props {
            for (suffix, operator) in [
                ("", TaxOperator::In),
                ("__in", TaxOperator::In),
                ("__not_in", TaxOperator::NotIn),
                ("__and", TaxOperator::And),
            ] {
                let raw = vars.get_list(&format!("{}{}", prop, suffix));
                if raw.is_empty() {
                    continue;
                }
                let leaf = Self::leaf(&def.taxonomy, def.term_field, &raw, operator);
                if leaf.terms.is_empty() {
                    continue;
                }
                nodes.push(TaxNode::Leaf(leaf));
            }
        }
        if let Some(query) = vars.get("tax_query") {
            nodes.push(self.parse_node(query, 0)?);
        }
        self.root = nodes;
        tracing::debug!(groups = self.root.len(), "tax clauses parsed");
        Ok(())
    }

    fn has_queries(&self) -> bool {
        !self.root.is_empty()
    }

    fn get_sql(&self, alias: &str, id_column: &str, _ctx: &mut ClauseContext) -> Result<SqlFragment> {
        let id = qualified(alias, id_column);
        let mut fragment = SqlFragment::default();
        for node in &self.root {
            if let Some((sql, params)) = self.node_sql(node, &id) {
                fragment.condition(sql, params);
            }
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_core::schema::{Cardinality, TermDef};
    use serde_json::json;

    fn clause() -> TaxClause {
        let schema = EntitySchema::builder("product", "products")
            .term("tags", TermDef::new("product_tag", Cardinality::Many).with_term_field(TermField::Slug))
            .term("brand", TermDef::new("brand", Cardinality::One))
            .build()
            .unwrap();
        TaxClause::new(Rc::new(schema), TaxonomyTables::default())
    }

    fn fragment(vars: serde_json::Value) -> SqlFragment {
        let mut clause = clause();
        clause.parse(&QueryVars::from_json(vars).unwrap()).unwrap();
        clause.get_sql("t", "id", &mut ClauseContext::default()).unwrap()
    }

    #[test]
    fn test_sanitize_per_field() {
        let raw = vec!["Kitchen Ware".to_string(), "kitchen-ware".to_string(), "  ".to_string()];
        assert_eq!(sanitize_terms(TermField::Slug, &raw), vec![SqlValue::Text("kitchen-ware".into())]);
        let ids = vec!["3".to_string(), "-1".to_string(), "x".to_string(), "3".to_string()];
        assert_eq!(sanitize_terms(TermField::Id, &ids), vec![SqlValue::Integer(3)]);
    }

    #[test]
    fn test_and_with_one_term_degrades_to_in() {
        let sql = fragment(json!({ "tags__and": "mugs" }));
        assert!(sql.where_sql().starts_with("t.\"id\" IN (SELECT"));
    }

    #[test]
    fn test_and_counts_distinct_terms() {
        let sql = fragment(json!({ "tags__and": "mugs, red" }));
        assert!(sql.where_sql().contains("COUNT(DISTINCT te.term_id)"));
        assert_eq!(sql.condition_params.last(), Some(&SqlValue::Integer(2)));
    }

    #[test]
    fn test_tax_query_not_exists() {
        let sql = fragment(json!({ "tax_query": [{ "taxonomy": "brand", "operator": "NOT EXISTS" }] }));
        assert!(sql.where_sql().starts_with("NOT EXISTS"));
        assert_eq!(sql.condition_params, vec![SqlValue::Text("brand".into())]);
    }

    #[test]
    fn test_tax_query_unknown_taxonomy() {
        let mut clause = clause();
        let vars = QueryVars::from_json(json!({ "tax_query": [{ "taxonomy": "color", "terms": [1] }] })).unwrap();
        assert!(clause.parse(&vars).is_err());
    }

    #[test]
    fn test_empty_explicit_in_matches_nothing() {
        let sql = fragment(json!({ "tax_query": [{ "taxonomy": "brand", "terms": [] }] }));
        assert_eq!(sql.where_sql(), "1 = 0");
    }
}
