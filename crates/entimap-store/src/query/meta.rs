//! Meta filters
//!
//! Sources, merged with AND at the top level:
//! - `meta_key` / `meta_value` / `meta_compare` / `meta_type` shorthand
//! - `meta_query`: nested clause groups with `relation`; object keys name
//!   clauses so ordering can refer to them
//! - meta-backed props by name: `<prop>`, `<prop>__in`, `<prop>__not_in`
//!
//! Filtering uses correlated `EXISTS` subqueries, so no join multiplies
//! rows. Only clauses the ordering asks for get a `LEFT JOIN` alias, which
//! is published through the [`ClauseContext`].

use crate::errors::{query_input, Result};
use crate::query::clause::{
    clause_group, combine, is_leaf, ClauseContext, ClauseParser, Compare, MetaAlias, Relation,
    SqlFragment,
};
use crate::query::vars::{scalar_text, QueryVars};
use crate::sql::{escape_like, placeholders, qualified, quote_ident};
use entimap_core::property::types::split_list;
use entimap_core::schema::{EntitySchema, SemanticType};
use entimap_core::{SqlValue, TypeRegistry, Value};
use serde_json::Value as JsonValue;
use std::rc::Rc;

const LEAF_MARKERS: &[&str] = &["key", "value", "compare", "type"];

#[derive(Debug, Clone)]
struct MetaLeaf {
    name: Option<String>,
    key: Option<String>,
    compare: Compare,
    values: Vec<SqlValue>,
    /// Cast applied to `meta_value` before comparing
    cast: Option<&'static str>,
}

#[derive(Debug, Clone)]
enum MetaNode {
    Leaf(MetaLeaf),
    Group(Relation, Vec<MetaNode>),
}

/// SQLite cast target for a meta clause `type`
fn meta_cast(type_name: &str) -> &'static str {
    match type_name.trim().to_ascii_uppercase().as_str() {
        "NUMERIC" | "SIGNED" | "UNSIGNED" | "INTEGER" | "INT" => "INTEGER",
        "DECIMAL" | "FLOAT" | "REAL" | "DOUBLE" => "REAL",
        _ => "TEXT",
    }
}

/// Bind a raw clause value according to the cast
fn cast_param(raw: &str, cast: Option<&'static str>) -> SqlValue {
    match cast {
        Some("INTEGER") => SqlValue::Integer(
            raw.trim()
                .parse()
                .or_else(|_| raw.trim().parse::<f64>().map(|f| f as i64))
                .unwrap_or(0),
        ),
        Some("REAL") => SqlValue::Real(raw.trim().parse().unwrap_or(0.0)),
        _ => SqlValue::Text(raw.to_string()),
    }
}

fn semantic_cast(semantic_type: &SemanticType) -> Option<&'static str> {
    match semantic_type {
        SemanticType::Float => Some("REAL"),
        t if t.is_numeric() => Some("INTEGER"),
        _ => None,
    }
}

pub struct MetaClause {
    schema: Rc<EntitySchema>,
    types: Rc<TypeRegistry>,
    table: String,
    root: Vec<MetaNode>,
    /// `orderby` tokens, used to decide which clauses need a join alias
    order_tokens: Vec<String>,
}

impl MetaClause {
    pub fn new(schema: Rc<EntitySchema>, types: Rc<TypeRegistry>, table: &str) -> Self {
        Self {
            schema,
            types,
            table: quote_ident(table),
            root: Vec::new(),
            order_tokens: Vec::new(),
        }
    }

    fn parse_leaf(&self, name: Option<String>, clause: &JsonValue) -> Result<MetaLeaf> {
        let key = clause.get("key").and_then(scalar_text);
        let value = clause.get("value").filter(|v| !v.is_null());
        let cast = clause
            .get("type")
            .and_then(JsonValue::as_str)
            .map(meta_cast)
            .unwrap_or("TEXT");

        let compare = match clause.get("compare").and_then(JsonValue::as_str) {
            Some(op) => Compare::parse(op),
            None if value.is_none() => Compare::Exists,
            None if value.map(JsonValue::is_array).unwrap_or(false) => Compare::In,
            None => Compare::Eq,
        };
        if key.is_none() && !matches!(compare, Compare::Exists | Compare::NotExists) && value.is_none() {
            return Err(query_input("meta clause needs a key or a value"));
        }

        let raw_values: Vec<String> = match value {
            None => Vec::new(),
            Some(JsonValue::Array(items)) => items.iter().filter_map(scalar_text).collect(),
            Some(v) if compare.takes_list() => scalar_text(v)
                .map(|s| split_list(&s, false))
                .unwrap_or_default(),
            Some(v) => scalar_text(v).into_iter().collect(),
        };
        let values = raw_values
            .iter()
            .map(|raw| match compare {
                Compare::Like | Compare::NotLike => SqlValue::Text(format!("%{}%", escape_like(raw))),
                _ => cast_param(raw, Some(cast)),
            })
            .collect();

        Ok(MetaLeaf {
            name,
            key,
            compare,
            values,
            cast: Some(cast),
        })
    }

    fn parse_node(&self, name: Option<String>, value: &JsonValue, depth: usize) -> Result<MetaNode> {
        if depth > 8 {
            return Err(query_input("meta_query nested too deeply"));
        }
        if is_leaf(value, LEAF_MARKERS) {
            return Ok(MetaNode::Leaf(self.parse_leaf(name, value)?));
        }
        let (relation, members) = clause_group(value)?;
        let children = members
            .into_iter()
            .map(|(name, member)| self.parse_node(name, member, depth + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(MetaNode::Group(relation, children))
    }

    fn prop_leaves(&self, vars: &QueryVars) -> Result<Vec<MetaNode>> {
        let mut nodes = Vec::new();
        for (prop, def) in &self.schema.meta_props {
            for (suffix, list_compare) in [("", None), ("__in", Some(Compare::In)), ("__not_in", Some(Compare::NotIn))] {
                let Some(raw) = vars.get(&format!("{}{}", prop, suffix)) else {
                    continue;
                };
                let items: Vec<JsonValue> = match (raw, list_compare) {
                    (JsonValue::Array(items), _) => items.clone(),
                    (JsonValue::String(s), Some(_)) => {
                        split_list(s, false).into_iter().map(JsonValue::String).collect()
                    }
                    (other, _) => vec![other.clone()],
                };
                let values = items
                    .iter()
                    .map(|item| {
                        self.types
                            .to_storage(&def.semantic_type, &Value::from_json(item))
                            .map_err(|e| query_input(format!("invalid value for {}: {}", prop, e.message())))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let compare = match list_compare {
                    Some(c) => c,
                    None if values.len() > 1 => Compare::In,
                    None => Compare::Eq,
                };
                nodes.push(MetaNode::Leaf(MetaLeaf {
                    name: Some(prop.clone()),
                    key: Some(def.key.clone()),
                    compare,
                    values,
                    cast: None,
                }));
            }
        }
        Ok(nodes)
    }

    fn leaf_sql(&self, leaf: &MetaLeaf, id: &str) -> Result<(String, Vec<SqlValue>)> {
        let mut filters = vec![format!("m.object_id = {}", id)];
        let mut params = Vec::new();
        if let Some(key) = &leaf.key {
            filters.push("m.meta_key = ?".to_string());
            params.push(SqlValue::Text(key.clone()));
        }
        let value = match leaf.cast {
            Some(cast) => format!("CAST(m.meta_value AS {})", cast),
            None => "m.meta_value".to_string(),
        };

        let exists = |filters: Vec<String>| {
            format!("EXISTS (SELECT 1 FROM {} m WHERE {})", self.table, filters.join(" AND "))
        };

        match leaf.compare {
            Compare::Exists => Ok((exists(filters), params)),
            Compare::NotExists => Ok((format!("NOT {}", exists(filters)), params)),
            Compare::Like | Compare::NotLike => {
                let op = if leaf.compare == Compare::Like { "LIKE" } else { "NOT LIKE" };
                let pattern = leaf.values.first().cloned().unwrap_or(SqlValue::Text("%".into()));
                filters.push(format!("{} {} ? ESCAPE '\\'", value, op));
                params.push(pattern);
                Ok((exists(filters), params))
            }
            Compare::In | Compare::NotIn => {
                if leaf.values.is_empty() {
                    return Ok(if leaf.compare == Compare::In {
                        ("1 = 0".to_string(), Vec::new())
                    } else {
                        (exists(filters), params)
                    });
                }
                let op = if leaf.compare == Compare::In { "IN" } else { "NOT IN" };
                filters.push(format!("{} {} ({})", value, op, placeholders(leaf.values.len())));
                params.extend(leaf.values.iter().cloned());
                Ok((exists(filters), params))
            }
            Compare::Between | Compare::NotBetween => {
                if leaf.values.len() != 2 {
                    return Err(query_input("BETWEEN needs exactly two values"));
                }
                let op = if leaf.compare == Compare::Between { "BETWEEN" } else { "NOT BETWEEN" };
                filters.push(format!("{} {} ? AND ?", value, op));
                params.extend(leaf.values.iter().cloned());
                Ok((exists(filters), params))
            }
            scalar => {
                let Some(first) = leaf.values.first() else {
                    return Ok((exists(filters), params));
                };
                filters.push(format!("{} {} ?", value, scalar.scalar_sql()));
                params.push(first.clone());
                Ok((exists(filters), params))
            }
        }
    }

    fn node_sql(&self, node: &MetaNode, id: &str) -> Result<Option<(String, Vec<SqlValue>)>> {
        match node {
            MetaNode::Leaf(leaf) => self.leaf_sql(leaf, id).map(Some),
            MetaNode::Group(relation, children) => {
                let mut parts = Vec::new();
                let mut params = Vec::new();
                for child in children {
                    if let Some((sql, child_params)) = self.node_sql(child, id)? {
                        parts.push(sql);
                        params.extend(child_params);
                    }
                }
                Ok(combine(parts, *relation).map(|sql| (sql, params)))
            }
        }
    }

    fn leaves(&self) -> Vec<&MetaLeaf> {
        fn walk<'a>(node: &'a MetaNode, out: &mut Vec<&'a MetaLeaf>) {
            match node {
                MetaNode::Leaf(leaf) => out.push(leaf),
                MetaNode::Group(_, children) => children.iter().for_each(|c| walk(c, out)),
            }
        }
        let mut out = Vec::new();
        self.root.iter().for_each(|node| walk(node, &mut out));
        out
    }

    fn wants_primary(&self) -> bool {
        self.order_tokens
            .iter()
            .any(|t| t == "meta_value" || t == "meta_value_num")
    }
}

impl ClauseParser for MetaClause {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn parse(&mut self, vars: &QueryVars) -> Result<()> {
        let mut nodes = Vec::new();

        if vars.contains("meta_key") || vars.contains("meta_value") {
            let mut shorthand = serde_json::Map::new();
            for (var, field) in [
                ("meta_key", "key"),
                ("meta_value", "value"),
                ("meta_compare", "compare"),
                ("meta_type", "type"),
            ] {
                if let Some(v) = vars.get(var) {
                    shorthand.insert(field.to_string(), v.clone());
                }
            }
            nodes.push(MetaNode::Leaf(self.parse_leaf(None, &JsonValue::Object(shorthand))?));
        }

        if let Some(query) = vars.get("meta_query") {
            nodes.push(self.parse_node(None, query, 0)?);
        }

        nodes.extend(self.prop_leaves(vars)?);
        self.root = nodes;

        self.order_tokens = match vars.get("orderby") {
            Some(JsonValue::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            Some(JsonValue::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        tracing::debug!(
            clauses = self.leaves().len(),
            order_tokens = self.order_tokens.len(),
            "meta clauses parsed"
        );
        Ok(())
    }

    fn has_queries(&self) -> bool {
        !self.root.is_empty()
            || self
                .order_tokens
                .iter()
                .any(|t| self.schema.meta_props.contains_key(t))
    }

    fn get_sql(&self, alias: &str, id_column: &str, ctx: &mut ClauseContext) -> Result<SqlFragment> {
        let mut fragment = SqlFragment::default();
        let id = qualified(alias, id_column);

        for node in &self.root {
            if let Some((sql, params)) = self.node_sql(node, &id)? {
                fragment.condition(sql, params);
            }
        }

        let mut next_alias = 0usize;
        let mut join_alias = |fragment: &mut SqlFragment, key: &str, cast: Option<&'static str>| {
            let name = format!("mt{}", next_alias);
            next_alias += 1;
            fragment.join(
                format!(
                    "LEFT JOIN {} AS {} ON ({}.object_id = {} AND {}.meta_key = ?)",
                    self.table, name, name, id, name
                ),
                [SqlValue::Text(key.to_string())],
            );
            MetaAlias {
                alias: name,
                cast: cast.filter(|c| *c != "TEXT"),
            }
        };

        let leaves = self.leaves();
        if self.wants_primary() {
            if let Some(leaf) = leaves.iter().find(|l| l.key.is_some()) {
                if let Some(key) = &leaf.key {
                    ctx.primary_meta = Some(join_alias(&mut fragment, key, leaf.cast));
                }
            }
        }
        for leaf in &leaves {
            let (Some(name), Some(key)) = (&leaf.name, &leaf.key) else {
                continue;
            };
            if self.order_tokens.contains(name) && !ctx.meta_aliases.contains_key(name) {
                let cast = match self.schema.meta_props.get(name) {
                    Some(def) => semantic_cast(&def.semantic_type),
                    None => leaf.cast,
                };
                let meta_alias = join_alias(&mut fragment, key, cast);
                ctx.meta_aliases.insert(name.clone(), meta_alias);
            }
        }
        for token in &self.order_tokens {
            if ctx.meta_aliases.contains_key(token) {
                continue;
            }
            if let Some(def) = self.schema.meta_props.get(token) {
                let meta_alias = join_alias(&mut fragment, &def.key, semantic_cast(&def.semantic_type));
                ctx.meta_aliases.insert(token.clone(), meta_alias);
            }
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_core::schema::MetaDef;
    use serde_json::json;

    fn clause() -> MetaClause {
        let schema = EntitySchema::builder("product", "products")
            .meta_table("product_meta")
            .meta("color", MetaDef::new("_color", SemanticType::String))
            .meta("price", MetaDef::new("_price", SemanticType::Int))
            .build()
            .unwrap();
        MetaClause::new(Rc::new(schema), Rc::new(TypeRegistry::new()), "product_meta")
    }

    fn sql_for(vars: serde_json::Value) -> (SqlFragment, ClauseContext) {
        let mut clause = clause();
        clause.parse(&QueryVars::from_json(vars).unwrap()).unwrap();
        let mut ctx = ClauseContext::default();
        let fragment = clause.get_sql("t", "id", &mut ctx).unwrap();
        (fragment, ctx)
    }

    #[test]
    fn test_prop_shorthand_uses_meta_key() {
        let (fragment, _) = sql_for(json!({ "color": "red" }));
        assert_eq!(fragment.conditions.len(), 1);
        assert!(fragment.conditions[0].starts_with("EXISTS"));
        assert_eq!(
            fragment.condition_params,
            vec![SqlValue::Text("_color".into()), SqlValue::Text("red".into())]
        );
        assert!(!fragment.has_joins());
    }

    #[test]
    fn test_or_relation_groups_clauses() {
        let (fragment, _) = sql_for(json!({
            "meta_query": {
                "relation": "OR",
                "0": { "key": "_color", "value": "red" },
                "1": { "key": "_price", "value": 10, "compare": ">", "type": "NUMERIC" }
            }
        }));
        let sql = fragment.where_sql();
        assert!(sql.contains(" OR "));
        assert!(sql.contains("CAST(m.meta_value AS INTEGER) > ?"));
        assert!(fragment.condition_params.contains(&SqlValue::Integer(10)));
    }

    #[test]
    fn test_named_clause_gets_order_alias() {
        let (fragment, ctx) = sql_for(json!({
            "meta_query": { "by_price": { "key": "_price", "type": "NUMERIC", "compare": "EXISTS" } },
            "orderby": { "by_price": "ASC" }
        }));
        assert_eq!(fragment.joins.len(), 1);
        let alias = ctx.meta_aliases.get("by_price").unwrap();
        assert_eq!(alias.value_sql(), "CAST(mt0.meta_value AS INTEGER)");
    }

    #[test]
    fn test_meta_value_ordering_uses_first_clause() {
        let (_, ctx) = sql_for(json!({ "meta_key": "_color", "orderby": "meta_value" }));
        assert_eq!(ctx.primary_meta.unwrap().alias, "mt0");
    }

    #[test]
    fn test_ordering_by_meta_prop_without_filter() {
        let mut clause = clause();
        clause
            .parse(&QueryVars::new().with("orderby", "price"))
            .unwrap();
        assert!(clause.has_queries());
        let mut ctx = ClauseContext::default();
        let fragment = clause.get_sql("t", "id", &mut ctx).unwrap();
        assert!(fragment.conditions.is_empty());
        assert!(ctx.meta_aliases.contains_key("price"));
    }

    #[test]
    fn test_between_needs_two_values() {
        let mut clause = clause();
        clause
            .parse(
                &QueryVars::from_json(json!({
                    "meta_query": [{ "key": "_price", "value": [1], "compare": "BETWEEN" }]
                }))
                .unwrap(),
            )
            .unwrap();
        let mut ctx = ClauseContext::default();
        assert!(clause.get_sql("t", "id", &mut ctx).is_err());
    }
}
