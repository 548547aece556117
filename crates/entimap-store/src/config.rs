//! Store configuration
//!
//! Loaded from YAML; every field has a default so an empty document is a
//! valid configuration.

use crate::errors::{config_error, io_error, Result};
use entimap_core::schema::is_identifier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Parse `ASC` / `DESC` case-insensitively
    pub fn parse(s: &str) -> Option<SortOrder> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Some(SortOrder::Asc),
            "DESC" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Names of the taxonomy tables created by migration 001
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyTables {
    pub terms: String,
    pub term_taxonomy: String,
    pub term_relationships: String,
}

impl Default for TaxonomyTables {
    fn default() -> Self {
        Self {
            terms: "terms".to_string(),
            term_taxonomy: "term_taxonomy".to_string(),
            term_relationships: "term_relationships".to_string(),
        }
    }
}

/// Full-text search limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// More terms than this and the whole string becomes one term
    pub max_terms: usize,
    /// Search strings are truncated to this many characters
    pub max_length: usize,
    /// Words dropped from unquoted searches
    pub stopwords: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_terms: 9,
            max_length: 1600,
            stopwords: default_stopwords(),
        }
    }
}

fn default_stopwords() -> Vec<String> {
    [
        "about", "an", "are", "as", "at", "be", "by", "com", "for", "from", "how", "in", "is",
        "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where",
        "who", "will", "with", "www",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

/// Bounds on caller-supplied pagination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Larger `per_page` values are clamped to this
    pub max_per_page: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { max_per_page: 1000 }
    }
}

/// Configuration for repositories and the query engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub taxonomy: TaxonomyTables,
    /// Memoize query results in the cache backend
    pub cache_results: bool,
    /// Keep per-id row copies in the cache backend
    pub cache_rows: bool,
    pub search: SearchConfig,
    pub pagination: PaginationConfig,
    /// Order applied when a query names no direction
    pub default_order: SortOrder,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            taxonomy: TaxonomyTables::default(),
            cache_results: true,
            cache_rows: true,
            search: SearchConfig::default(),
            pagination: PaginationConfig::default(),
            default_order: SortOrder::Desc,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a YAML document
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed YAML, unknown keys or
    /// invalid values.
    pub fn from_yaml_str(content: &str) -> Result<StoreConfig> {
        if content.trim().is_empty() {
            return Ok(StoreConfig::default());
        }
        let config: StoreConfig = serde_yaml::from_str(content)
            .map_err(|e| config_error(&format!("YAML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML config file
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, otherwise as
    /// [`StoreConfig::from_yaml_str`].
    pub fn from_path(path: &Path) -> Result<StoreConfig> {
        let content = fs::read_to_string(path).map_err(|e| io_error("config_load", e))?;
        Self::from_yaml_str(&content)
    }

    /// Check table names and search limits
    ///
    /// # Errors
    ///
    /// Returns a serialization error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.taxonomy.terms,
            &self.taxonomy.term_taxonomy,
            &self.taxonomy.term_relationships,
        ] {
            if !is_identifier(name) {
                return Err(config_error(&format!(
                    "taxonomy table name {:?} is not a valid identifier",
                    name
                )));
            }
        }
        if self.search.max_terms == 0 {
            return Err(config_error("search.max_terms must be at least 1"));
        }
        if self.search.max_length == 0 {
            return Err(config_error("search.max_length must be at least 1"));
        }
        if self.pagination.max_per_page < 1 {
            return Err(config_error("pagination.max_per_page must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(StoreConfig::from_yaml_str("").unwrap(), StoreConfig::default());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = StoreConfig::from_yaml_str(
            r#"
cache_results: false
default_order: ASC
search:
  max_terms: 4
"#,
        )
        .unwrap();
        assert!(!config.cache_results);
        assert_eq!(config.default_order, SortOrder::Asc);
        assert_eq!(config.search.max_terms, 4);
        assert_eq!(config.search.max_length, 1600);
        assert!(config.search.stopwords.contains(&"the".to_string()));
        assert_eq!(config.taxonomy.terms, "terms");
    }

    #[test]
    fn test_pagination_cap() {
        assert_eq!(StoreConfig::default().pagination.max_per_page, 1000);
        let config = StoreConfig::from_yaml_str("pagination:\n  max_per_page: 50").unwrap();
        assert_eq!(config.pagination.max_per_page, 50);
        assert!(StoreConfig::from_yaml_str("pagination:\n  max_per_page: 0").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(StoreConfig::from_yaml_str("colour: blue").is_err());
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let err = StoreConfig::from_yaml_str("taxonomy:\n  terms: \"my terms\"").unwrap_err();
        assert!(err.to_string().contains("not a valid identifier"));
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("asc"), Some(SortOrder::Asc));
        assert_eq!(SortOrder::parse(" Desc "), Some(SortOrder::Desc));
        assert_eq!(SortOrder::parse("sideways"), None);
    }
}
