//! Date filters over date-typed columns
//!
//! `<prop>__before` / `<prop>__after` (exclusive) and `date_query`, a clause
//! group whose leaves take `column`, `after`, `before`, `inclusive`, `year`,
//! `month` and `day`. Only enabled when the schema has date columns.

use crate::errors::{query_input, Result};
use crate::query::clause::{clause_group, combine, is_leaf, ClauseContext, ClauseParser, Relation, SqlFragment};
use crate::query::vars::{scalar_text, QueryVars};
use crate::sql::qualified;
use entimap_core::schema::{EntitySchema, SemanticType};
use entimap_core::{SqlValue, TypeRegistry, Value};
use serde_json::Value as JsonValue;
use std::rc::Rc;

const LEAF_MARKERS: &[&str] = &["column", "after", "before", "year", "month", "day"];

#[derive(Debug, Clone, Default)]
struct DateLeaf {
    column: String,
    after: Option<SqlValue>,
    before: Option<SqlValue>,
    inclusive: bool,
    parts: Vec<(&'static str, i64)>,
}

#[derive(Debug, Clone)]
enum DateNode {
    Leaf(DateLeaf),
    Group(Relation, Vec<DateNode>),
}

pub struct DateClause {
    schema: Rc<EntitySchema>,
    types: Rc<TypeRegistry>,
    root: Vec<DateNode>,
}

/// `YYYY-MM-DD` with no time part
fn is_bare_date(text: &str) -> bool {
    chrono::NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").is_ok()
}

impl DateClause {
    pub fn new(schema: Rc<EntitySchema>, types: Rc<TypeRegistry>) -> Self {
        Self {
            schema,
            types,
            root: Vec::new(),
        }
    }

    /// Storage form of a date bound; a bare inclusive upper bound covers the whole day
    fn bound(&self, raw: &JsonValue, end_of_day: bool) -> Result<SqlValue> {
        let text = scalar_text(raw).unwrap_or_default();
        let value = if end_of_day && is_bare_date(&text) {
            Value::Text(format!("{} 23:59:59", text.trim()))
        } else {
            Value::from_json(raw)
        };
        match self.types.to_storage(&SemanticType::Date, &value)? {
            SqlValue::Null => Err(query_input(format!("unparseable date {:?}", text))),
            stored => Ok(stored),
        }
    }

    fn storage_column(&self, prop: Option<&str>) -> Result<String> {
        let dates = self.schema.date_columns();
        match prop {
            Some(prop) => dates
                .iter()
                .find(|(name, _)| *name == prop)
                .map(|(_, def)| def.storage_name.clone())
                .ok_or_else(|| query_input(format!("{} is not a date column", prop))),
            None => dates
                .first()
                .map(|(_, def)| def.storage_name.clone())
                .ok_or_else(|| query_input("no date column to filter on")),
        }
    }

    fn parse_leaf(&self, clause: &JsonValue) -> Result<DateLeaf> {
        let column = self.storage_column(clause.get("column").and_then(JsonValue::as_str))?;
        let inclusive = clause
            .get("inclusive")
            .map(|v| matches!(v, JsonValue::Bool(true)) || v.as_i64() == Some(1))
            .unwrap_or(false);
        let after = clause
            .get("after")
            .filter(|v| !v.is_null())
            .map(|v| self.bound(v, false))
            .transpose()?;
        let before = clause
            .get("before")
            .filter(|v| !v.is_null())
            .map(|v| self.bound(v, inclusive))
            .transpose()?;
        let mut parts = Vec::new();
        for (field, format) in [("year", "%Y"), ("month", "%m"), ("day", "%d")] {
            if let Some(n) = clause.get(field).and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            }) {
                parts.push((format, n));
            }
        }
        Ok(DateLeaf {
            column,
            after,
            before,
            inclusive,
            parts,
        })
    }

    fn parse_node(&self, value: &JsonValue, depth: usize) -> Result<DateNode> {
        if depth > 8 {
            return Err(query_input("date_query nested too deeply"));
        }
        if is_leaf(value, LEAF_MARKERS) {
            return Ok(DateNode::Leaf(self.parse_leaf(value)?));
        }
        let (relation, members) = clause_group(value)?;
        let children = members
            .into_iter()
            .map(|(_, member)| self.parse_node(member, depth + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(DateNode::Group(relation, children))
    }

    fn leaf_sql(leaf: &DateLeaf, alias: &str) -> Option<(String, Vec<SqlValue>)> {
        let column = qualified(alias, &leaf.column);
        let mut parts = Vec::new();
        let mut params = Vec::new();
        if let Some(after) = &leaf.after {
            parts.push(format!("{} {} ?", column, if leaf.inclusive { ">=" } else { ">" }));
            params.push(after.clone());
        }
        if let Some(before) = &leaf.before {
            parts.push(format!("{} {} ?", column, if leaf.inclusive { "<=" } else { "<" }));
            params.push(before.clone());
        }
        for (format, n) in &leaf.parts {
            parts.push(format!("CAST(strftime('{}', {}) AS INTEGER) = ?", format, column));
            params.push(SqlValue::Integer(*n));
        }
        combine(parts, Relation::And).map(|sql| (sql, params))
    }

    fn node_sql(node: &DateNode, alias: &str) -> Option<(String, Vec<SqlValue>)> {
        match node {
            DateNode::Leaf(leaf) => Self::leaf_sql(leaf, alias),
            DateNode::Group(relation, children) => {
                let mut parts = Vec::new();
                let mut params = Vec::new();
                for (sql, child_params) in children.iter().filter_map(|c| Self::node_sql(c, alias)) {
                    parts.push(sql);
                    params.extend(child_params);
                }
                combine(parts, *relation).map(|sql| (sql, params))
            }
        }
    }
}

impl ClauseParser for DateClause {
    fn name(&self) -> &'static str {
        "date"
    }

    fn parse(&mut self, vars: &QueryVars) -> Result<()> {
        let mut nodes = Vec::new();
        for (prop, def) in self.schema.date_columns() {
            let after = vars.get(&format!("{}__after", prop));
            let before = vars.get(&format!("{}__before", prop));
            if after.is_none() && before.is_none() {
                continue;
            }
            nodes.push(DateNode::Leaf(DateLeaf {
                column: def.storage_name.clone(),
                after: after.map(|v| self.bound(v, false)).transpose()?,
                before: before.map(|v| self.bound(v, false)).transpose()?,
                ..DateLeaf::default()
            }));
        }
        if let Some(query) = vars.get("date_query") {
            nodes.push(self.parse_node(query, 0)?);
        }
        self.root = nodes;
        Ok(())
    }

    fn has_queries(&self) -> bool {
        !self.root.is_empty()
    }

    fn get_sql(&self, alias: &str, _id_column: &str, _ctx: &mut ClauseContext) -> Result<SqlFragment> {
        let mut fragment = SqlFragment::default();
        for node in &self.root {
            if let Some((sql, params)) = Self::node_sql(node, alias) {
                fragment.condition(sql, params);
            }
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_core::schema::ColumnDef;
    use serde_json::json;

    fn clause() -> DateClause {
        let schema = EntitySchema::builder("post", "posts")
            .column("title", ColumnDef::new("title", SemanticType::String))
            .column("published", ColumnDef::new("published_at", SemanticType::Date))
            .build()
            .unwrap();
        DateClause::new(Rc::new(schema), Rc::new(TypeRegistry::new()))
    }

    fn fragment(vars: serde_json::Value) -> SqlFragment {
        let mut clause = clause();
        clause.parse(&QueryVars::from_json(vars).unwrap()).unwrap();
        clause.get_sql("t", "id", &mut ClauseContext::default()).unwrap()
    }

    #[test]
    fn test_before_after_shorthand() {
        let sql = fragment(json!({ "published__after": "2024-01-01", "published__before": "2024-02-01" }));
        assert_eq!(sql.where_sql(), "(t.\"published_at\" > ? AND t.\"published_at\" < ?)");
        assert_eq!(sql.condition_params[0], SqlValue::Text("2024-01-01 00:00:00".into()));
    }

    #[test]
    fn test_inclusive_before_covers_whole_day() {
        let sql = fragment(json!({ "date_query": [{ "before": "2024-03-31", "inclusive": true }] }));
        assert!(sql.where_sql().contains("<= ?"));
        assert_eq!(sql.condition_params[0], SqlValue::Text("2024-03-31 23:59:59".into()));
    }

    #[test]
    fn test_year_part() {
        let sql = fragment(json!({ "date_query": [{ "column": "published", "year": 2023 }] }));
        assert!(sql.where_sql().contains("strftime('%Y'"));
        assert_eq!(sql.condition_params, vec![SqlValue::Integer(2023)]);
    }

    #[test]
    fn test_rejects_non_date_column_and_garbage() {
        let mut clause = clause();
        assert!(clause
            .parse(&QueryVars::from_json(json!({ "date_query": [{ "column": "title", "year": 1 }] })).unwrap())
            .is_err());
        assert!(clause
            .parse(&QueryVars::new().with("published__after", "not a date"))
            .is_err());
    }
}
