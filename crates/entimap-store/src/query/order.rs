//! Ordering
//!
//! Runs last: it is the only parser that reads what the others published
//! (meta aliases, search relevance, the `include` list). `orderby` is a
//! space-separated list of keys or a map of key to direction. Keys:
//! `id`, column props, `rand`, `relevance`, `meta_value`, `meta_value_num`,
//! `include`, `none`, and meta clause names or meta props. Unknown keys are
//! ignored. The id is always appended as a tie-breaker.

use crate::config::SortOrder;
use crate::errors::Result;
use crate::query::clause::{ClauseContext, ClauseParser, SqlFragment};
use crate::query::vars::QueryVars;
use crate::sql::qualified;
use entimap_core::schema::EntitySchema;
use entimap_core::SqlValue;
use serde_json::Value as JsonValue;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OrderKey {
    Id,
    Column(String),
    Rand,
    Relevance,
    MetaValue { numeric: bool },
    Include,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderItem {
    key: OrderKey,
    dir: SortOrder,
}

/// Whether the vars ask for random ordering
pub fn is_random_order(vars: &QueryVars) -> bool {
    match vars.get("orderby") {
        Some(JsonValue::String(s)) => s.split_whitespace().any(is_rand),
        Some(JsonValue::Object(map)) => map.keys().any(|k| is_rand(k)),
        _ => false,
    }
}

fn is_rand(token: &str) -> bool {
    token.eq_ignore_ascii_case("rand") || token.eq_ignore_ascii_case("rand()")
}

pub struct OrderClause {
    schema: Rc<EntitySchema>,
    default_order: SortOrder,
    order: SortOrder,
    items: Vec<OrderItem>,
    explicit: bool,
}

impl OrderClause {
    pub fn new(schema: Rc<EntitySchema>, default_order: SortOrder) -> Self {
        Self {
            schema,
            default_order,
            order: default_order,
            items: Vec::new(),
            explicit: false,
        }
    }

    fn resolve(&self, token: &str) -> Option<OrderKey> {
        let key = match token {
            t if t.eq_ignore_ascii_case("id") || t == self.schema.id_field => OrderKey::Id,
            t if is_rand(t) => OrderKey::Rand,
            "relevance" => OrderKey::Relevance,
            "meta_value" => OrderKey::MetaValue { numeric: false },
            "meta_value_num" => OrderKey::MetaValue { numeric: true },
            "include" => OrderKey::Include,
            "none" => return None,
            t => match self.schema.columns.get(t) {
                Some(column) => OrderKey::Column(column.storage_name.clone()),
                None => OrderKey::Named(t.to_string()),
            },
        };
        Some(key)
    }

    fn item_sql(
        &self,
        item: &OrderItem,
        alias: &str,
        id_column: &str,
        ctx: &ClauseContext,
    ) -> Option<(String, Vec<SqlValue>)> {
        let dir = item.dir.as_sql();
        match &item.key {
            OrderKey::Id => Some((format!("{} {}", qualified(alias, id_column), dir), Vec::new())),
            OrderKey::Column(column) => {
                Some((format!("{} {}", qualified(alias, column), dir), Vec::new()))
            }
            OrderKey::Rand => Some(("RANDOM()".to_string(), Vec::new())),
            OrderKey::Relevance => ctx
                .relevance
                .as_ref()
                .map(|(sql, params)| (format!("{} ASC", sql), params.clone())),
            OrderKey::MetaValue { numeric } => ctx.primary_meta.as_ref().map(|meta| {
                let value = if *numeric {
                    format!("CAST({}.meta_value AS REAL)", meta.alias)
                } else {
                    meta.value_sql()
                };
                (format!("{} {}", value, dir), Vec::new())
            }),
            OrderKey::Named(name) => ctx
                .meta_aliases
                .get(name)
                .map(|meta| (format!("{} {}", meta.value_sql(), dir), Vec::new())),
            OrderKey::Include if !ctx.include.is_empty() => {
                let whens: Vec<String> = (0..ctx.include.len())
                    .map(|i| format!("WHEN ? THEN {}", i))
                    .collect();
                Some((
                    format!(
                        "CASE {} {} END ASC",
                        qualified(alias, id_column),
                        whens.join(" ")
                    ),
                    ctx.include.iter().map(|id| SqlValue::Integer(*id)).collect(),
                ))
            }
            OrderKey::Include => None,
        }
    }
}

impl ClauseParser for OrderClause {
    fn name(&self) -> &'static str {
        "order"
    }

    fn parse(&mut self, vars: &QueryVars) -> Result<()> {
        self.order = vars
            .get_str("order")
            .and_then(|s| SortOrder::parse(&s))
            .unwrap_or(self.default_order);
        self.items.clear();
        self.explicit = vars.contains("orderby");

        let pairs: Vec<(String, SortOrder)> = match vars.get("orderby") {
            Some(JsonValue::String(s)) => s
                .split_whitespace()
                .map(|t| (t.to_string(), self.order))
                .collect(),
            Some(JsonValue::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let dir = v.as_str().and_then(SortOrder::parse).unwrap_or(self.order);
                    (k.clone(), dir)
                })
                .collect(),
            _ => Vec::new(),
        };
        for (token, dir) in pairs {
            if let Some(key) = self.resolve(&token) {
                if !self.items.iter().any(|item| item.key == key) {
                    self.items.push(OrderItem { key, dir });
                }
            }
        }
        Ok(())
    }

    fn has_queries(&self) -> bool {
        true
    }

    fn get_sql(&self, alias: &str, id_column: &str, ctx: &mut ClauseContext) -> Result<SqlFragment> {
        let mut parts = Vec::new();
        let mut params = Vec::new();

        for item in &self.items {
            if let Some((sql, item_params)) = self.item_sql(item, alias, id_column, ctx) {
                parts.push(sql);
                params.extend(item_params);
            }
        }

        if parts.is_empty() && !self.explicit {
            if let Some((sql, relevance_params)) = &ctx.relevance {
                parts.push(format!("{} ASC", sql));
                params.extend(relevance_params.iter().cloned());
            }
        }

        let random = self.items.iter().any(|item| item.key == OrderKey::Rand);
        let has_id = self.items.iter().any(|item| item.key == OrderKey::Id);
        if !random && !has_id {
            parts.push(format!("{} {}", qualified(alias, id_column), self.order.as_sql()));
        }

        let mut fragment = SqlFragment::default();
        fragment.order(parts.join(", "), params);
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::clause::MetaAlias;
    use entimap_core::schema::{ColumnDef, SemanticType};
    use serde_json::json;

    fn clause() -> OrderClause {
        let schema = EntitySchema::builder("product", "products")
            .column("name", ColumnDef::new("name", SemanticType::String))
            .column("stock", ColumnDef::new("stock_qty", SemanticType::Int))
            .build()
            .unwrap();
        OrderClause::new(Rc::new(schema), SortOrder::Desc)
    }

    fn order_by(vars: serde_json::Value, ctx: &mut ClauseContext) -> SqlFragment {
        let mut clause = clause();
        clause.parse(&QueryVars::from_json(vars).unwrap()).unwrap();
        clause.get_sql("t", "id", ctx).unwrap()
    }

    #[test]
    fn test_default_is_id_in_default_direction() {
        let sql = order_by(json!({}), &mut ClauseContext::default());
        assert_eq!(sql.orderby.as_deref(), Some("t.\"id\" DESC"));
    }

    #[test]
    fn test_columns_with_tiebreak() {
        let sql = order_by(json!({ "orderby": "stock name", "order": "asc" }), &mut ClauseContext::default());
        assert_eq!(
            sql.orderby.as_deref(),
            Some("t.\"stock_qty\" ASC, t.\"name\" ASC, t.\"id\" ASC")
        );
    }

    #[test]
    fn test_map_form_and_unknown_keys_ignored() {
        let sql = order_by(
            json!({ "orderby": { "name": "ASC", "bogus": "DESC", "id": "DESC" } }),
            &mut ClauseContext::default(),
        );
        assert_eq!(sql.orderby.as_deref(), Some("t.\"id\" DESC, t.\"name\" ASC"));
    }

    #[test]
    fn test_relevance_leads_when_no_orderby() {
        let mut ctx = ClauseContext {
            relevance: Some(("CASE WHEN x THEN 1 ELSE 99 END".into(), vec![SqlValue::Integer(1)])),
            ..ClauseContext::default()
        };
        let sql = order_by(json!({ "s": "a b" }), &mut ctx);
        assert_eq!(
            sql.orderby.as_deref(),
            Some("CASE WHEN x THEN 1 ELSE 99 END ASC, t.\"id\" DESC")
        );
        assert_eq!(sql.order_params.len(), 1);
    }

    #[test]
    fn test_meta_value_num_uses_primary_alias() {
        let mut ctx = ClauseContext {
            primary_meta: Some(MetaAlias {
                alias: "mt0".into(),
                cast: None,
            }),
            ..ClauseContext::default()
        };
        let sql = order_by(json!({ "orderby": "meta_value_num" }), &mut ctx);
        assert!(sql.orderby.unwrap().starts_with("CAST(mt0.meta_value AS REAL) DESC"));
    }

    #[test]
    fn test_include_order() {
        let mut ctx = ClauseContext {
            include: vec![9, 4],
            ..ClauseContext::default()
        };
        let sql = order_by(json!({ "orderby": "include" }), &mut ctx);
        assert!(sql.orderby.unwrap().starts_with("CASE t.\"id\" WHEN ? THEN 0 WHEN ? THEN 1 END ASC"));
        assert_eq!(sql.order_params, vec![SqlValue::Integer(9), SqlValue::Integer(4)]);
    }

    #[test]
    fn test_rand_has_no_tiebreak() {
        let vars = QueryVars::new().with("orderby", "rand");
        assert!(is_random_order(&vars));
        let sql = order_by(json!({ "orderby": "rand" }), &mut ClauseContext::default());
        assert_eq!(sql.orderby.as_deref(), Some("RANDOM()"));
    }
}
