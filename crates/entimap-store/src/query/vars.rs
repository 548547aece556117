//! Query variables
//!
//! A loosely typed filter map, as callers usually build it from request
//! parameters. Accessors coerce leniently: numbers may arrive as strings and
//! lists as comma/whitespace separated text.

use crate::errors::{query_input, Result};
use entimap_core::property::types::split_list;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Keys that only affect which slice of the result is returned
pub const PAGINATION_KEYS: &[&str] = &["page", "per_page", "offset", "count", "cache_results", "fields"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryVars(Map<String, JsonValue>);

impl QueryVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON object
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `json` is not an object.
    pub fn from_json(json: JsonValue) -> Result<Self> {
        match json {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(query_input(format!(
                "query vars must be an object, got {}",
                other
            ))),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    /// Raw value; JSON `null` counts as absent
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Text form of a scalar
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => s.trim().parse().ok(),
            JsonValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            JsonValue::Bool(b) => Some(*b),
            JsonValue::Number(n) => Some(n.as_f64().unwrap_or(0.0) != 0.0),
            JsonValue::String(s) => Some(matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )),
            _ => None,
        }
    }

    /// List form: arrays item by item, text split on commas and whitespace
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(list_items).unwrap_or_default()
    }

    /// Ids from a list-valued key; non-positive and malformed ids dropped
    pub fn get_ids(&self, key: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::new();
        for id in self.get_list(key).iter().filter_map(|s| s.parse::<i64>().ok()) {
            if id > 0 && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Page size; `None` means unlimited (absent or not positive)
    pub fn per_page(&self) -> Option<i64> {
        self.get_i64("per_page").filter(|n| *n > 0)
    }

    /// Row offset of the requested slice
    ///
    /// An explicit `offset` wins over `page`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `page` is so large the offset does not fit in i64.
    pub fn start_offset(&self, per_page: Option<i64>) -> Result<i64> {
        match (per_page, self.offset()) {
            (_, Some(offset)) => Ok(offset),
            (Some(per_page), None) => (self.page() - 1)
                .checked_mul(per_page)
                .ok_or_else(|| query_input(format!("page {} is out of range", self.page()))),
            (None, None) => Ok(0),
        }
    }

    /// 1-based page number
    pub fn page(&self) -> i64 {
        self.get_i64("page").filter(|n| *n > 0).unwrap_or(1)
    }

    /// Explicit row offset, overriding `page`
    pub fn offset(&self) -> Option<i64> {
        self.get_i64("offset").filter(|n| *n >= 0)
    }

    /// The map without pagination-only keys, for cache keys
    pub fn normalized(&self) -> Map<String, JsonValue> {
        self.0
            .iter()
            .filter(|(k, _)| !PAGINATION_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl From<Map<String, JsonValue>> for QueryVars {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

/// Text form of a JSON scalar
pub fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

/// Items of a list-ish JSON value
pub fn list_items(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .flat_map(|s| split_list(&s, true))
            .collect(),
        JsonValue::String(s) => split_list(s, true),
        other => scalar_text(other).into_iter().collect(),
    }
}
