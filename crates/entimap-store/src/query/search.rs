//! Full-text search over searchable columns
//!
//! `s` is split into quoted phrases and bare words. Bare single letters,
//! lone dashes and stop-words are dropped; quoted phrases are kept as
//! written. A leading `-` or `!` turns a term into an exclusion. With too
//! many terms, or none left after filtering, the whole string is matched
//! as one term. `sentence` skips splitting altogether.
//!
//! Each positive term must match at least one searchable column; each
//! exclusion must match none. With more than one positive term a relevance
//! expression is published for ordering.

use crate::config::SearchConfig;
use crate::errors::Result;
use crate::query::clause::{ClauseContext, ClauseParser, SqlFragment};
use crate::query::vars::QueryVars;
use crate::sql::{escape_like, qualified};
use entimap_core::SqlValue;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)] // constant pattern
static TERM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*(?:"|$)|[^\t ",+]+"#).expect("static regex should not panic"));

const EXCLUSION_PREFIXES: &[char] = &['-', '!'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub text: String,
    pub exclude: bool,
}

pub struct SearchClause {
    columns: Vec<String>,
    config: SearchConfig,
    search: String,
    terms: Vec<SearchTerm>,
}

impl SearchClause {
    pub fn new(columns: Vec<String>, config: SearchConfig) -> Self {
        Self {
            columns,
            config,
            search: String::new(),
            terms: Vec::new(),
        }
    }

    pub fn terms(&self) -> &[SearchTerm] {
        &self.terms
    }

    fn is_stopword(&self, term: &str) -> bool {
        let lower = term.to_lowercase();
        self.config.stopwords.iter().any(|w| *w == lower)
    }

    /// Clean raw regex matches into search terms
    fn parse_terms(&self, raw: &[&str]) -> Vec<SearchTerm> {
        let mut terms = Vec::new();
        for token in raw {
            let quoted = token.len() > 1 && token.starts_with('"') && token.ends_with('"');
            let text = if quoted {
                token.trim_matches(|c| c == '"' || c == '\'')
            } else {
                token.trim_matches(|c: char| c == '"' || c == '\'' || c == ' ')
            };
            if text.is_empty() {
                continue;
            }
            if !quoted {
                if text.chars().count() == 1
                    && text.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
                {
                    continue;
                }
                if self.is_stopword(text) {
                    continue;
                }
            }
            terms.push(Self::classify(text));
        }
        terms
    }

    fn classify(text: &str) -> SearchTerm {
        match text.strip_prefix(EXCLUSION_PREFIXES) {
            Some(rest) if !rest.is_empty() => SearchTerm {
                text: rest.to_string(),
                exclude: true,
            },
            _ => SearchTerm {
                text: text.to_string(),
                exclude: false,
            },
        }
    }

    fn like(text: &str) -> SqlValue {
        SqlValue::Text(format!("%{}%", escape_like(text)))
    }

    /// Relevance ranking: whole string in the first column, then all terms,
    /// then any term in the first column, then the whole string elsewhere
    fn relevance(&self, alias: &str, positives: &[&SearchTerm]) -> (String, Vec<SqlValue>) {
        let mut sql = String::from("CASE");
        let mut params = Vec::new();
        let Some(first) = self.columns.first() else {
            return ("0".to_string(), params);
        };
        let first = format!("COALESCE({}, '')", qualified(alias, first));

        sql.push_str(&format!(" WHEN {} LIKE ? ESCAPE '\\' THEN 1", first));
        params.push(Self::like(&self.search));

        let all: Vec<String> = positives
            .iter()
            .map(|_| format!("{} LIKE ? ESCAPE '\\'", first))
            .collect();
        sql.push_str(&format!(" WHEN {} THEN 2", all.join(" AND ")));
        params.extend(positives.iter().map(|t| Self::like(&t.text)));

        sql.push_str(&format!(" WHEN {} THEN 3", all.join(" OR ")));
        params.extend(positives.iter().map(|t| Self::like(&t.text)));

        for (rank, column) in self.columns.iter().skip(1).enumerate() {
            sql.push_str(&format!(
                " WHEN COALESCE({}, '') LIKE ? ESCAPE '\\' THEN {}",
                qualified(alias, column),
                rank + 4
            ));
            params.push(Self::like(&self.search));
        }
        sql.push_str(" ELSE 99 END");
        (sql, params)
    }
}

impl ClauseParser for SearchClause {
    fn name(&self) -> &'static str {
        "search"
    }

    fn parse(&mut self, vars: &QueryVars) -> Result<()> {
        self.terms.clear();
        let raw = vars.get_str("s").unwrap_or_default();
        let search: String = raw
            .replace('\\', "")
            .trim()
            .chars()
            .take(self.config.max_length)
            .collect();
        self.search = search.trim().to_string();
        if self.search.is_empty() || self.columns.is_empty() {
            return Ok(());
        }

        if vars.get_bool("sentence").unwrap_or(false) {
            self.terms = vec![SearchTerm {
                text: self.search.clone(),
                exclude: false,
            }];
            return Ok(());
        }

        let matches: Vec<&str> = TERM_REGEX
            .find_iter(&self.search)
            .map(|m| m.as_str())
            .collect();
        let terms = self.parse_terms(&matches);
        self.terms = if terms.is_empty() || terms.len() > self.config.max_terms {
            vec![SearchTerm {
                text: self.search.clone(),
                exclude: false,
            }]
        } else {
            terms
        };
        tracing::debug!(terms = self.terms.len(), "search parsed");
        Ok(())
    }

    fn has_queries(&self) -> bool {
        !self.terms.is_empty()
    }

    fn get_sql(&self, alias: &str, _id_column: &str, ctx: &mut ClauseContext) -> Result<SqlFragment> {
        let mut fragment = SqlFragment::default();
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("COALESCE({}, '')", qualified(alias, c)))
            .collect();

        for term in &self.terms {
            let (op, joiner) = if term.exclude {
                ("NOT LIKE", " AND ")
            } else {
                ("LIKE", " OR ")
            };
            let parts: Vec<String> = columns
                .iter()
                .map(|c| format!("{} {} ? ESCAPE '\\'", c, op))
                .collect();
            fragment.condition(
                format!("({})", parts.join(joiner)),
                columns.iter().map(|_| Self::like(&term.text)),
            );
        }

        let positives: Vec<&SearchTerm> = self.terms.iter().filter(|t| !t.exclude).collect();
        if positives.len() > 1 {
            ctx.relevance = Some(self.relevance(alias, &positives));
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause() -> SearchClause {
        SearchClause::new(vec!["name".into(), "description".into()], SearchConfig::default())
    }

    fn parsed(s: &str) -> Vec<SearchTerm> {
        let mut clause = clause();
        clause.parse(&QueryVars::new().with("s", s)).unwrap();
        clause.terms().to_vec()
    }

    fn term(text: &str, exclude: bool) -> SearchTerm {
        SearchTerm {
            text: text.into(),
            exclude,
        }
    }

    #[test]
    fn test_stopwords_and_single_letters_dropped() {
        assert_eq!(parsed("the red a mug"), vec![term("red", false), term("mug", false)]);
    }

    #[test]
    fn test_quoted_phrase_kept_with_stopwords() {
        assert_eq!(parsed("\"the red\" mug"), vec![term("the red", false), term("mug", false)]);
    }

    #[test]
    fn test_exclusion_prefixes() {
        assert_eq!(parsed("-red !blue mug"), vec![term("red", true), term("blue", true), term("mug", false)]);
    }

    #[test]
    fn test_only_stopwords_falls_back_to_sentence() {
        assert_eq!(parsed("the of"), vec![term("the of", false)]);
    }

    #[test]
    fn test_too_many_terms_falls_back_to_sentence() {
        let s = "one two three four five six seven eight nine ten";
        assert_eq!(parsed(s), vec![term(s, false)]);
    }

    #[test]
    fn test_length_is_capped() {
        let mut clause = SearchClause::new(
            vec!["name".into()],
            SearchConfig {
                max_length: 5,
                ..SearchConfig::default()
            },
        );
        clause
            .parse(&QueryVars::new().with("s", "abcdefghij").with("sentence", true))
            .unwrap();
        assert_eq!(clause.terms(), &[term("abcde", false)]);
    }

    #[test]
    fn test_sql_and_relevance() {
        let mut clause = clause();
        clause.parse(&QueryVars::new().with("s", "red mug -blue")).unwrap();
        let mut ctx = ClauseContext::default();
        let sql = clause.get_sql("t", "id", &mut ctx).unwrap();
        assert_eq!(sql.conditions.len(), 3);
        assert!(sql.conditions[2].contains("NOT LIKE"));
        assert!(sql.conditions[2].contains(" AND "));
        assert_eq!(sql.condition_params[0], SqlValue::Text("%red%".into()));
        let (relevance, params) = ctx.relevance.unwrap();
        assert!(relevance.starts_with("CASE WHEN"));
        assert_eq!(params.len(), relevance.matches('?').count());
    }

    #[test]
    fn test_single_term_has_no_relevance() {
        let mut clause = clause();
        clause.parse(&QueryVars::new().with("s", "red")).unwrap();
        let mut ctx = ClauseContext::default();
        clause.get_sql("t", "id", &mut ctx).unwrap();
        assert!(ctx.relevance.is_none());
    }
}
