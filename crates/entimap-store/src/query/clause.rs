//! Clause parser contract and SQL fragments
//!
//! Each parser owns one filter concern. It reads the query vars in
//! `parse`, reports whether it found anything in `has_queries`, and emits a
//! [`SqlFragment`] in `get_sql`. Fragments are merged by appending joins and
//! conditions; an ordering overwrites any earlier one.

use crate::errors::{query_input, Result};
use crate::query::vars::QueryVars;
use entimap_core::SqlValue;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// SQL pieces contributed by one parser, each with its own bound parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub joins: Vec<String>,
    pub join_params: Vec<SqlValue>,
    pub conditions: Vec<String>,
    pub condition_params: Vec<SqlValue>,
    pub orderby: Option<String>,
    pub order_params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn join(&mut self, sql: String, params: impl IntoIterator<Item = SqlValue>) {
        self.joins.push(sql);
        self.join_params.extend(params);
    }

    pub fn condition(&mut self, sql: String, params: impl IntoIterator<Item = SqlValue>) {
        self.conditions.push(sql);
        self.condition_params.extend(params);
    }

    pub fn order(&mut self, sql: String, params: Vec<SqlValue>) {
        self.orderby = Some(sql);
        self.order_params = params;
    }

    /// Append joins and conditions; an ordering in `other` replaces ours
    pub fn merge(&mut self, other: SqlFragment) {
        self.joins.extend(other.joins);
        self.join_params.extend(other.join_params);
        self.conditions.extend(other.conditions);
        self.condition_params.extend(other.condition_params);
        if other.orderby.is_some() {
            self.orderby = other.orderby;
            self.order_params = other.order_params;
        }
    }

    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// `WHERE` body, `1 = 1` when unconstrained
    pub fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            "1 = 1".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }

    pub fn join_sql(&self) -> String {
        self.joins.join(" ")
    }
}

/// Meta table alias joined for ordering
#[derive(Debug, Clone, PartialEq)]
pub struct MetaAlias {
    pub alias: String,
    /// SQLite cast target applied when ordering, if any
    pub cast: Option<&'static str>,
}

impl MetaAlias {
    /// Value expression of the alias, cast when requested
    pub fn value_sql(&self) -> String {
        match self.cast {
            Some(cast) => format!("CAST({}.meta_value AS {})", self.alias, cast),
            None => format!("{}.meta_value", self.alias),
        }
    }
}

/// State parsers publish for the ordering parser
#[derive(Debug, Clone, Default)]
pub struct ClauseContext {
    /// Alias of the first meta clause, target of `orderby=meta_value`
    pub primary_meta: Option<MetaAlias>,
    /// Aliases of named meta clauses
    pub meta_aliases: BTreeMap<String, MetaAlias>,
    /// Search relevance expression and its parameters
    pub relevance: Option<(String, Vec<SqlValue>)>,
    /// Ids from `include`, in caller order
    pub include: Vec<i64>,
}

/// One filter concern
pub trait ClauseParser {
    fn name(&self) -> &'static str;

    /// Read this parser's keys from the vars
    ///
    /// # Errors
    ///
    /// `InvalidInput` for malformed values.
    fn parse(&mut self, vars: &QueryVars) -> Result<()>;

    fn has_queries(&self) -> bool;

    /// Emit SQL against the row table `alias` and its `id_column`
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the parsed input cannot be expressed in SQL.
    fn get_sql(&self, alias: &str, id_column: &str, ctx: &mut ClauseContext) -> Result<SqlFragment>;
}

/// How sibling clauses combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relation {
    #[default]
    And,
    Or,
}

impl Relation {
    pub fn parse(value: Option<&JsonValue>) -> Relation {
        match value.and_then(JsonValue::as_str) {
            Some(s) if s.trim().eq_ignore_ascii_case("or") => Relation::Or,
            _ => Relation::And,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Relation::And => " AND ",
            Relation::Or => " OR ",
        }
    }
}

/// Split a clause group into its relation and (name, clause) members
///
/// Accepts a list of clauses or an object whose `relation` key sets the
/// relation and whose other keys name clauses. Numeric keys are unnamed.
///
/// # Errors
///
/// `InvalidInput` if `value` is neither a list nor an object.
pub fn clause_group(value: &JsonValue) -> Result<(Relation, Vec<(Option<String>, &JsonValue)>)> {
    match value {
        JsonValue::Array(items) => Ok((Relation::And, items.iter().map(|v| (None, v)).collect())),
        JsonValue::Object(map) => {
            let relation = Relation::parse(map.get("relation"));
            let members = map
                .iter()
                .filter(|(k, _)| k.as_str() != "relation")
                .map(|(k, v)| {
                    let name = if k.chars().all(|c| c.is_ascii_digit()) {
                        None
                    } else {
                        Some(k.clone())
                    };
                    (name, v)
                })
                .collect();
            Ok((relation, members))
        }
        other => Err(query_input(format!("expected a clause list, got {}", other))),
    }
}

/// Whether an object is a single clause rather than a nested group
pub fn is_leaf(value: &JsonValue, markers: &[&str]) -> bool {
    value
        .as_object()
        .map(|map| markers.iter().any(|m| map.contains_key(*m)))
        .unwrap_or(false)
}

/// Join sub-conditions with a relation, parenthesized
pub fn combine(parts: Vec<String>, relation: Relation) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("({})", parts.join(relation.as_sql()))),
    }
}

/// Comparison operators accepted in meta and column clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
    Exists,
    NotExists,
}

impl Compare {
    /// Parse an operator; unknown operators fall back to `=`
    pub fn parse(op: &str) -> Compare {
        match op.trim().to_ascii_uppercase().as_str() {
            "!=" | "<>" => Compare::Ne,
            ">" => Compare::Gt,
            ">=" => Compare::Gte,
            "<" => Compare::Lt,
            "<=" => Compare::Lte,
            "LIKE" => Compare::Like,
            "NOT LIKE" => Compare::NotLike,
            "IN" => Compare::In,
            "NOT IN" => Compare::NotIn,
            "BETWEEN" => Compare::Between,
            "NOT BETWEEN" => Compare::NotBetween,
            "EXISTS" => Compare::Exists,
            "NOT EXISTS" => Compare::NotExists,
            _ => Compare::Eq,
        }
    }

    /// Operator for single-value comparisons
    pub fn scalar_sql(&self) -> &'static str {
        match self {
            Compare::Ne => "<>",
            Compare::Gt => ">",
            Compare::Gte => ">=",
            Compare::Lt => "<",
            Compare::Lte => "<=",
            _ => "=",
        }
    }

    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            Compare::In | Compare::NotIn | Compare::Between | Compare::NotBetween
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_appends_and_overwrites_order() {
        let mut a = SqlFragment::default();
        a.condition("a = ?".into(), [SqlValue::Integer(1)]);
        a.order("x ASC".into(), vec![]);
        let mut b = SqlFragment::default();
        b.join("JOIN m".into(), []);
        b.condition("b = ?".into(), [SqlValue::Integer(2)]);
        b.order("y DESC".into(), vec![SqlValue::Integer(3)]);
        a.merge(b);
        assert_eq!(a.where_sql(), "a = ? AND b = ?");
        assert_eq!(a.condition_params.len(), 2);
        assert_eq!(a.orderby.as_deref(), Some("y DESC"));
        assert!(a.has_joins());
    }

    #[test]
    fn test_clause_group_forms() {
        let group = json!({
            "relation": "or",
            "0": { "key": "a" },
            "price_clause": { "key": "b" }
        });
        let (relation, members) = clause_group(&group).unwrap();
        assert_eq!(relation, Relation::Or);
        assert_eq!(members.len(), 2);
        assert!(members.iter().any(|(name, _)| name.as_deref() == Some("price_clause")));
        assert!(members.iter().any(|(name, _)| name.is_none()));
        assert!(clause_group(&json!("nope")).is_err());
    }

    #[test]
    fn test_compare_parse_defaults_to_eq() {
        assert_eq!(Compare::parse("not in"), Compare::NotIn);
        assert_eq!(Compare::parse("REGEXP"), Compare::Eq);
        assert_eq!(Compare::parse(">="), Compare::Gte);
    }

    #[test]
    fn test_combine() {
        assert_eq!(combine(vec![], Relation::And), None);
        assert_eq!(combine(vec!["a".into()], Relation::Or).as_deref(), Some("a"));
        assert_eq!(
            combine(vec!["a".into(), "b".into()], Relation::Or).as_deref(),
            Some("(a OR b)")
        );
    }
}
