//! Query result cache
//!
//! Stores the id list (and total, once known) of a query under a key
//! derived from the normalized vars and the generated SQL. The entity
//! type's cache generation is appended to the key, so any write to the
//! entity type orphans every cached result without touching them.

use crate::config::StoreConfig;
use crate::errors::{from_json, Result};
use crate::host::CacheBackend;
use crate::query::order::is_random_order;
use crate::query::vars::QueryVars;
use entimap_core::SqlValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::rc::Rc;

/// `fields` values whose results can be rebuilt from ids alone
const CACHEABLE_FIELDS: &[&str] = &["all", "ids"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResult {
    pub ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

pub struct ResultCache {
    cache: Rc<dyn CacheBackend>,
    group: String,
}

impl ResultCache {
    pub fn new(cache: Rc<dyn CacheBackend>, group: impl Into<String>) -> Self {
        Self {
            cache,
            group: group.into(),
        }
    }

    /// Whether a query with these vars may be served from cache
    pub fn is_cacheable(config: &StoreConfig, vars: &QueryVars) -> bool {
        if !config.cache_results || vars.get_bool("cache_results") == Some(false) {
            return false;
        }
        if is_random_order(vars) {
            return false;
        }
        match vars.get_str("fields") {
            None => vars.get("fields").is_none(),
            Some(fields) => CACHEABLE_FIELDS.contains(&fields.as_str()),
        }
    }

    /// `query:<sha256 of vars, sql and params>:<generation>`
    ///
    /// # Errors
    ///
    /// Serialization error if the vars or params cannot be encoded.
    pub fn key(&self, vars: &QueryVars, sql: &str, params: &[SqlValue]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&vars.normalized()).map_err(from_json)?);
        hasher.update(b"\n");
        hasher.update(sql.as_bytes());
        hasher.update(b"\n");
        hasher.update(serde_json::to_vec(params).map_err(from_json)?);
        Ok(format!(
            "query:{}:{}",
            hex::encode(hasher.finalize()),
            self.cache.generation(&self.group)
        ))
    }

    pub fn get(&self, key: &str) -> Option<CachedResult> {
        let value = self.cache.get(key, &self.group)?;
        match serde_json::from_value(value) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::debug!(key, error = %e, "discarding unreadable cached result");
                self.cache.delete(key, &self.group);
                None
            }
        }
    }

    /// # Errors
    ///
    /// Serialization error if the result cannot be encoded.
    pub fn set(&self, key: &str, result: &CachedResult) -> Result<()> {
        let value = serde_json::to_value(result).map_err(from_json)?;
        self.cache.set(key, value, &self.group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryCache;
    use serde_json::json;

    fn cache() -> ResultCache {
        ResultCache::new(Rc::new(MemoryCache::new()), "product")
    }

    #[test]
    fn test_cacheable_rules() {
        let config = StoreConfig::default();
        assert!(ResultCache::is_cacheable(&config, &QueryVars::new()));
        assert!(ResultCache::is_cacheable(&config, &QueryVars::new().with("fields", "ids")));
        assert!(!ResultCache::is_cacheable(&config, &QueryVars::new().with("orderby", "rand")));
        assert!(!ResultCache::is_cacheable(&config, &QueryVars::new().with("cache_results", false)));
        assert!(!ResultCache::is_cacheable(
            &config,
            &QueryVars::from_json(json!({ "fields": ["name"] })).unwrap()
        ));
        let disabled = StoreConfig {
            cache_results: false,
            ..StoreConfig::default()
        };
        assert!(!ResultCache::is_cacheable(&disabled, &QueryVars::new()));
    }

    #[test]
    fn test_key_ignores_pagination_but_not_sql() {
        let cache = cache();
        let a = cache
            .key(&QueryVars::new().with("s", "red").with("page", 1), "SELECT 1", &[])
            .unwrap();
        let b = cache
            .key(&QueryVars::new().with("s", "red").with("page", 2), "SELECT 1", &[])
            .unwrap();
        let c = cache
            .key(&QueryVars::new().with("s", "red"), "SELECT 2", &[])
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("query:") && a.ends_with(":0"));
    }

    #[test]
    fn test_generation_bump_changes_key() {
        let backend = Rc::new(MemoryCache::new());
        let cache = ResultCache::new(backend.clone(), "product");
        let before = cache.key(&QueryVars::new(), "SELECT 1", &[]).unwrap();
        cache
            .set(&before, &CachedResult { ids: vec![1, 2], total: Some(2) })
            .unwrap();
        assert_eq!(cache.get(&before).unwrap().ids, vec![1, 2]);
        backend.bump_generation("product");
        let after = cache.key(&QueryVars::new(), "SELECT 1", &[]).unwrap();
        assert_ne!(before, after);
        assert!(cache.get(&after).is_none());
    }
}
