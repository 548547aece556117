//! Row-table column filters
//!
//! `<prop>`, `<prop>__in`, `<prop>__not_in`, `<prop>__like`,
//! `<prop>__gt|__gte|__lt|__lte`, plus `include` / `exclude` id lists.
//! Values are encoded with the column's semantic type so they compare
//! against storage exactly.

use crate::errors::{query_input, Result};
use crate::query::clause::{ClauseContext, ClauseParser, SqlFragment};
use crate::query::vars::{scalar_text, QueryVars};
use crate::sql::{escape_like, placeholders, qualified};
use entimap_core::property::types::split_list;
use entimap_core::schema::{ColumnDef, EntitySchema};
use entimap_core::{SqlValue, TypeRegistry, Value};
use serde_json::Value as JsonValue;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnOp {
    Eq,
    In,
    NotIn,
    Like,
    Gt,
    Gte,
    Lt,
    Lte,
}

const SUFFIXES: &[(&str, ColumnOp)] = &[
    ("", ColumnOp::Eq),
    ("__in", ColumnOp::In),
    ("__not_in", ColumnOp::NotIn),
    ("__like", ColumnOp::Like),
    ("__gt", ColumnOp::Gt),
    ("__gte", ColumnOp::Gte),
    ("__lt", ColumnOp::Lt),
    ("__lte", ColumnOp::Lte),
];

#[derive(Debug, Clone)]
struct ColumnCondition {
    column: String,
    op: ColumnOp,
    values: Vec<SqlValue>,
}

pub struct ColumnClause {
    schema: Rc<EntitySchema>,
    types: Rc<TypeRegistry>,
    conditions: Vec<ColumnCondition>,
    include: Vec<i64>,
    exclude: Vec<i64>,
}

impl ColumnClause {
    pub fn new(schema: Rc<EntitySchema>, types: Rc<TypeRegistry>) -> Self {
        Self {
            schema,
            types,
            conditions: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    fn encode(&self, prop: &str, def: &ColumnDef, raw: &JsonValue) -> Result<SqlValue> {
        self.types
            .to_storage(&def.semantic_type, &Value::from_json(raw))
            .map_err(|e| query_input(format!("invalid value for {}: {}", prop, e.message())))
    }

    fn items(raw: &JsonValue) -> Vec<JsonValue> {
        match raw {
            JsonValue::Array(items) => items.clone(),
            JsonValue::String(s) => split_list(s, false).into_iter().map(JsonValue::String).collect(),
            other => vec![other.clone()],
        }
    }
}

impl ClauseParser for ColumnClause {
    fn name(&self) -> &'static str {
        "column"
    }

    fn parse(&mut self, vars: &QueryVars) -> Result<()> {
        self.conditions.clear();
        for (prop, def) in &self.schema.columns {
            for (suffix, op) in SUFFIXES {
                let Some(raw) = vars.get(&format!("{}{}", prop, suffix)) else {
                    continue;
                };
                let (op, values) = match op {
                    ColumnOp::Eq if raw.is_array() => (
                        ColumnOp::In,
                        Self::items(raw)
                            .iter()
                            .map(|item| self.encode(prop, def, item))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    ColumnOp::In | ColumnOp::NotIn => (
                        *op,
                        Self::items(raw)
                            .iter()
                            .map(|item| self.encode(prop, def, item))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    ColumnOp::Like => {
                        let text = scalar_text(raw).unwrap_or_default();
                        (*op, vec![SqlValue::Text(format!("%{}%", escape_like(&text)))])
                    }
                    _ => (*op, vec![self.encode(prop, def, raw)?]),
                };
                if values.is_empty() {
                    continue;
                }
                self.conditions.push(ColumnCondition {
                    column: def.storage_name.clone(),
                    op,
                    values,
                });
            }
        }
        self.include = vars.get_ids("include");
        self.exclude = vars.get_ids("exclude");
        tracing::debug!(
            conditions = self.conditions.len(),
            include = self.include.len(),
            exclude = self.exclude.len(),
            "column clauses parsed"
        );
        Ok(())
    }

    fn has_queries(&self) -> bool {
        !self.conditions.is_empty() || !self.include.is_empty() || !self.exclude.is_empty()
    }

    fn get_sql(&self, alias: &str, id_column: &str, ctx: &mut ClauseContext) -> Result<SqlFragment> {
        let mut fragment = SqlFragment::default();
        let id = qualified(alias, id_column);

        if !self.include.is_empty() {
            fragment.condition(
                format!("{} IN ({})", id, placeholders(self.include.len())),
                self.include.iter().map(|id| SqlValue::Integer(*id)),
            );
            ctx.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            fragment.condition(
                format!("{} NOT IN ({})", id, placeholders(self.exclude.len())),
                self.exclude.iter().map(|id| SqlValue::Integer(*id)),
            );
        }

        for condition in &self.conditions {
            let column = qualified(alias, &condition.column);
            let values = condition.values.clone();
            let sql = match condition.op {
                ColumnOp::Eq if values.iter().all(SqlValue::is_null) => {
                    fragment.condition(format!("{} IS NULL", column), []);
                    continue;
                }
                ColumnOp::Eq => format!("{} = ?", column),
                ColumnOp::In => format!("{} IN ({})", column, placeholders(values.len())),
                ColumnOp::NotIn => format!(
                    "({} IS NULL OR {} NOT IN ({}))",
                    column,
                    column,
                    placeholders(values.len())
                ),
                ColumnOp::Like => format!("{} LIKE ? ESCAPE '\\'", column),
                ColumnOp::Gt => format!("{} > ?", column),
                ColumnOp::Gte => format!("{} >= ?", column),
                ColumnOp::Lt => format!("{} < ?", column),
                ColumnOp::Lte => format!("{} <= ?", column),
            };
            fragment.condition(sql, values);
        }
        Ok(fragment)
    }
}
