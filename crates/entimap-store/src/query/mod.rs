//! Query engine
//!
//! Builds filtered, ordered, paginated queries over one entity type from
//! loosely typed [`QueryVars`]. Each filter concern is a [`ClauseParser`];
//! the engine enables the parsers the schema supports, merges their SQL
//! fragments and runs the result:
//!
//! - an inner query selecting ids with a `ROW_NUMBER()` position, where
//!   filtering, ordering and `LIMIT/OFFSET` happen
//! - an outer query joining full rows to the inner ids `USING (id)`
//! - a count query without `LIMIT`, only when the result is limited and the
//!   total is asked for
//!
//! Id lists are cached per entity type (see [`cache`]).
//!
//! ## Logging
//!
//! `query_execute` emits `log_op_start!` / `log_op_end!` / `log_op_error!`.
//! Parsers log at `debug` only.

pub mod cache;
pub mod clause;
pub mod column;
pub mod date;
pub mod meta;
pub mod order;
pub mod search;
pub mod tax;
pub mod vars;

use crate::errors::{query_input, Result};
use crate::host::{Executor, Row};
use crate::repo::Repository;
use crate::sql::{qualified, quote_ident};
use cache::{CachedResult, ResultCache};
use clause::{ClauseContext, ClauseParser, SqlFragment};
use column::ColumnClause;
use date::DateClause;
use entimap_core::{log_op_end, log_op_error, log_op_start, Entity, ExErrorKind, SqlValue};
use meta::MetaClause;
use order::OrderClause;
use search::SearchClause;
use serde_json::Value as JsonValue;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;
use tax::TaxClause;

pub use vars::QueryVars;

/// Alias of the row table inside generated SQL
const ALIAS: &str = "t";
const POSITION: &str = "_pos";

/// Shape of the returned objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fields {
    /// Hydrated entities
    All,
    /// Ids only
    Ids,
    /// Raw rows with the id and the named column props
    Columns(Vec<String>),
}

impl Fields {
    fn parse(vars: &QueryVars, repo: &Repository) -> Result<Fields> {
        let props = match vars.get("fields") {
            None => return Ok(Fields::All),
            Some(JsonValue::String(s)) if s.trim().eq_ignore_ascii_case("all") => return Ok(Fields::All),
            Some(JsonValue::String(s)) if s.trim().eq_ignore_ascii_case("ids") => return Ok(Fields::Ids),
            Some(other) => vars::list_items(other),
        };
        let schema = repo.schema();
        let mut columns = Vec::new();
        for prop in props {
            if prop == schema.id_field || prop == "id" {
                continue;
            }
            if !schema.columns.contains_key(&prop) {
                return Err(query_input(format!("unknown field {:?}", prop)));
            }
            if !columns.contains(&prop) {
                columns.push(prop);
            }
        }
        Ok(Fields::Columns(columns))
    }
}

/// SQL ready to run for one set of vars
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    /// Ordered, paginated id query
    pub ids_sql: String,
    /// Row query wrapping `ids_sql`; same parameters
    pub select_sql: String,
    pub params: Vec<SqlValue>,
    pub count_sql: String,
    pub count_params: Vec<SqlValue>,
    pub fields: Fields,
    pub per_page: Option<i64>,
    /// A `LIMIT` or `OFFSET` applies
    pub limited: bool,
}

/// Objects returned by a query, in result order
#[derive(Debug)]
pub enum QueryObjects {
    Entities(Vec<Entity>),
    Ids(Vec<i64>),
    Rows(Vec<Row>),
}

impl QueryObjects {
    pub fn len(&self) -> usize {
        match self {
            QueryObjects::Entities(v) => v.len(),
            QueryObjects::Ids(v) => v.len(),
            QueryObjects::Rows(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CountQuery {
    db: Rc<dyn Executor>,
    sql: String,
    params: Vec<SqlValue>,
}

/// Result of [`QueryEngine::query`]
///
/// The total is computed on first request unless `count` was set.
pub struct QueryResult {
    objects: QueryObjects,
    per_page: Option<i64>,
    count: Option<CountQuery>,
    total: Cell<Option<i64>>,
    from_cache: bool,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("objects", &self.objects)
            .field("per_page", &self.per_page)
            .field("total", &self.total.get())
            .field("from_cache", &self.from_cache)
            .finish()
    }
}

impl QueryResult {
    fn new(objects: QueryObjects, per_page: Option<i64>, count: Option<CountQuery>) -> Self {
        Self {
            objects,
            per_page,
            count,
            total: Cell::new(None),
            from_cache: false,
        }
    }

    pub fn objects(&self) -> &QueryObjects {
        &self.objects
    }

    pub fn into_objects(self) -> QueryObjects {
        self.objects
    }

    /// Hydrated entities, if the query returned them
    pub fn entities(&self) -> Option<&[Entity]> {
        match &self.objects {
            QueryObjects::Entities(entities) => Some(entities),
            _ => None,
        }
    }

    /// Ids of the returned objects, in order
    pub fn ids(&self) -> Vec<i64> {
        match &self.objects {
            QueryObjects::Entities(entities) => entities.iter().map(Entity::id).collect(),
            QueryObjects::Ids(ids) => ids.clone(),
            QueryObjects::Rows(rows) => rows
                .iter()
                .filter_map(|row| row.value(0).and_then(SqlValue::as_i64))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn per_page(&self) -> Option<i64> {
        self.per_page
    }

    /// Served from the result cache
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Matching objects ignoring pagination
    ///
    /// Runs the count query once when the result is limited; otherwise the
    /// number of returned objects.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the count query fails.
    pub fn total(&self) -> Result<i64> {
        if let Some(total) = self.total.get() {
            return Ok(total);
        }
        let total = match &self.count {
            Some(count) => count
                .db
                .query_scalar(&count.sql, &count.params)?
                .and_then(|v| v.as_i64())
                .unwrap_or(1),
            None => self.objects.len() as i64,
        };
        self.total.set(Some(total));
        Ok(total)
    }

    /// `ceil(total / per_page)` when paginated, else 1
    ///
    /// # Errors
    ///
    /// As [`QueryResult::total`].
    pub fn pages(&self) -> Result<i64> {
        match self.per_page {
            Some(per_page) => {
                let total = self.total()?;
                Ok(total / per_page + i64::from(total % per_page != 0))
            }
            None => Ok(1),
        }
    }
}

/// Query builder and runner for one repository
pub struct QueryEngine {
    repo: Rc<Repository>,
}

impl QueryEngine {
    pub fn new(repo: Rc<Repository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Rc<Repository> {
        &self.repo
    }

    /// Parsers the schema supports; ordering always runs last
    fn parsers(&self) -> Vec<Box<dyn ClauseParser>> {
        let schema = self.repo.schema();
        let types = self.repo.types();
        let config = self.repo.config();

        let mut parsers: Vec<Box<dyn ClauseParser>> = vec![Box::new(ColumnClause::new(
            Rc::clone(schema),
            Rc::clone(types),
        ))];
        if let Some(table) = &schema.meta_table {
            parsers.push(Box::new(MetaClause::new(Rc::clone(schema), Rc::clone(types), table)));
        }
        if !schema.date_columns().is_empty() {
            parsers.push(Box::new(DateClause::new(Rc::clone(schema), Rc::clone(types))));
        }
        if !schema.term_props.is_empty() {
            parsers.push(Box::new(TaxClause::new(Rc::clone(schema), config.taxonomy.clone())));
        }
        let searchable: Vec<String> = schema
            .searchable_columns()
            .iter()
            .map(|c| c.storage_name.clone())
            .collect();
        if !searchable.is_empty() {
            parsers.push(Box::new(SearchClause::new(searchable, config.search.clone())));
        }
        parsers.push(Box::new(OrderClause::new(Rc::clone(schema), config.default_order)));
        parsers
    }

    /// Generate the SQL for a set of vars without running it
    ///
    /// # Errors
    ///
    /// `InvalidInput` for malformed vars.
    pub fn build(&self, vars: &QueryVars) -> Result<BuiltQuery> {
        let schema = self.repo.schema();
        let id = &schema.id_field;
        let table = quote_ident(&schema.table);
        let id_ref = qualified(ALIAS, id);

        let mut parsers = self.parsers();
        for parser in parsers.iter_mut() {
            parser.parse(vars)?;
        }

        let mut ctx = ClauseContext::default();
        let mut fragment = SqlFragment::default();
        for parser in &parsers {
            if parser.has_queries() {
                tracing::debug!(parser = parser.name(), "clause active");
                fragment.merge(parser.get_sql(ALIAS, id, &mut ctx)?);
            }
        }

        let orderby = fragment
            .orderby
            .clone()
            .unwrap_or_else(|| format!("{} ASC", id_ref));
        let group_by = if fragment.has_joins() {
            format!(" GROUP BY {}", id_ref)
        } else {
            String::new()
        };
        let from = format!(
            "FROM {} AS {} {} WHERE {}{}",
            table,
            ALIAS,
            fragment.join_sql(),
            fragment.where_sql(),
            group_by
        );

        let max_per_page = self.repo.config().pagination.max_per_page;
        let per_page = vars.per_page().map(|n| n.min(max_per_page));
        let offset = vars.start_offset(per_page)?;
        let limit_sql = match per_page {
            Some(_) => " LIMIT ? OFFSET ?",
            None if offset > 0 => " LIMIT -1 OFFSET ?",
            None => "",
        };
        let limited = !limit_sql.is_empty();

        let ids_sql = format!(
            "SELECT {id_ref} AS {id}, ROW_NUMBER() OVER (ORDER BY {orderby}) AS {pos} {from} ORDER BY {pos}{limit_sql}",
            id = quote_ident(id),
            pos = quote_ident(POSITION),
        );

        let mut params = fragment.order_params.clone();
        params.extend(fragment.join_params.iter().cloned());
        params.extend(fragment.condition_params.iter().cloned());
        if let Some(per_page) = per_page {
            params.push(SqlValue::Integer(per_page));
        }
        if limited {
            params.push(SqlValue::Integer(offset));
        }

        let fields = Fields::parse(vars, &self.repo)?;
        let select_list = match &fields {
            Fields::Columns(props) => {
                let mut list = vec![id_ref.clone()];
                list.extend(
                    props
                        .iter()
                        .filter_map(|p| schema.columns.get(p))
                        .map(|c| qualified(ALIAS, &c.storage_name)),
                );
                list.join(", ")
            }
            _ => format!("{}.*", ALIAS),
        };
        let select_sql = match &fields {
            Fields::Ids => ids_sql.clone(),
            _ => format!(
                "SELECT {} FROM {} AS {} INNER JOIN ({}) AS q USING ({}) ORDER BY q.{}",
                select_list,
                table,
                ALIAS,
                ids_sql,
                quote_ident(id),
                quote_ident(POSITION)
            ),
        };

        let count_sql = format!(
            "SELECT COUNT(*) FROM (SELECT {} FROM {} AS {} {} WHERE {} GROUP BY {})",
            id_ref,
            table,
            ALIAS,
            fragment.join_sql(),
            fragment.where_sql(),
            id_ref
        );
        let mut count_params = fragment.join_params.clone();
        count_params.extend(fragment.condition_params.iter().cloned());

        Ok(BuiltQuery {
            ids_sql,
            select_sql,
            params,
            count_sql,
            count_params,
            fields,
            per_page,
            limited,
        })
    }

    /// Run a query
    ///
    /// # Errors
    ///
    /// `InvalidInput` for malformed vars; persistence errors from the store.
    pub fn query(&self, vars: &QueryVars) -> Result<QueryResult> {
        log_op_start!("query_execute", entity_type = %self.repo.entity_type());
        let start = Instant::now();

        let result = self.query_impl(vars).map_err(|e| {
            log_op_error!(
                "query_execute",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "query_execute",
            duration_ms = start.elapsed().as_millis() as u64,
            count = result.len(),
            cached = result.from_cache
        );
        Ok(result)
    }

    fn query_impl(&self, vars: &QueryVars) -> Result<QueryResult> {
        let built = self.build(vars)?;
        let db = Rc::clone(&self.repo.host().db);
        let eager_count = vars.get_bool("count").unwrap_or(false);
        let count_query = || {
            built.limited.then(|| CountQuery {
                db: Rc::clone(&db),
                sql: built.count_sql.clone(),
                params: built.count_params.clone(),
            })
        };

        let cache = ResultCache::is_cacheable(self.repo.config(), vars).then(|| {
            ResultCache::new(Rc::clone(&self.repo.host().cache), self.repo.entity_type())
        });
        let cache_key = match &cache {
            Some(cache) => Some(cache.key(vars, &built.ids_sql, &built.params)?),
            None => None,
        };

        if let (Some(cache), Some(key)) = (&cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(entity_type = %self.repo.entity_type(), ids = hit.ids.len(), "result cache hit");
                let mut result =
                    QueryResult::new(self.objects_from_ids(hit.ids, &built.fields)?, built.per_page, count_query());
                result.from_cache = true;
                result.total.set(hit.total);
                if eager_count {
                    result.total()?;
                }
                return Ok(result);
            }
        }

        let objects = match &built.fields {
            Fields::Ids => QueryObjects::Ids(
                db.query(&built.ids_sql, &built.params)?
                    .iter()
                    .filter_map(|row| row.value(0).and_then(SqlValue::as_i64))
                    .collect(),
            ),
            Fields::All => QueryObjects::Entities(
                db.query(&built.select_sql, &built.params)?
                    .iter()
                    .map(|row| self.repo.from_row(row))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Fields::Columns(_) => QueryObjects::Rows(db.query(&built.select_sql, &built.params)?),
        };

        let result = QueryResult::new(objects, built.per_page, count_query());
        if eager_count {
            result.total()?;
        }
        if let (Some(cache), Some(key)) = (&cache, &cache_key) {
            cache.set(
                key,
                &CachedResult {
                    ids: result.ids(),
                    total: result.total.get(),
                },
            )?;
        }
        Ok(result)
    }

    /// Rebuild cached ids; rows deleted since caching are skipped
    fn objects_from_ids(&self, ids: Vec<i64>, fields: &Fields) -> Result<QueryObjects> {
        match fields {
            Fields::Ids => Ok(QueryObjects::Ids(ids)),
            _ => {
                let mut entities = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.repo.read(id) {
                        Ok(entity) => entities.push(entity),
                        Err(e) if e.kind() == ExErrorKind::NotFound => {
                            tracing::debug!(entity_id = id, "cached id no longer exists");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(QueryObjects::Entities(entities))
            }
        }
    }
}
