//! COUNT derivation and the request-scoped count memo.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::builder::{QueryBuilder, UNIQUE_ID};
use super::placeholder::PARAM_PREFIX;
use super::types::Params;
use crate::db::Storage;
use crate::error::EngineResult;

/// Alias of the derived table wrapped by the count query.
const COUNT_ALIAS: &str = "x";

/// Alias of the count column.
pub const COUNT_COLUMN: &str = "total";

/// Generated placeholder names, renumbered when hashing.
#[allow(clippy::expect_used)]
static GENERATED_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r":({PARAM_PREFIX}\d+)\b"))
        .expect("GENERATED_PARAM regex is a compile-time constant")
});

/// Drop paging and ordering. Grouping goes too unless a HAVING clause
/// depends on it; then both stay and the count must wrap the query.
fn strip_for_count(builder: &mut QueryBuilder) {
    builder.limit_from = 0;
    builder.limit_num = 0;
    builder.order_by.clear();
    if builder.raw_having.is_empty() {
        builder.group_by.clear();
    }
}

fn wrap_count(builder: &QueryBuilder, inner: QueryBuilder, expr: String) -> QueryBuilder {
    let mut outer = QueryBuilder::with_prefix(builder.table_prefix());
    outer
        .select(expr, COUNT_COLUMN)
        .from_subquery(inner, COUNT_ALIAS)
        .set_distinct(false);
    outer
}

/// Expression identifying one logical row of `builder`.
fn unique_expression(builder: &QueryBuilder) -> String {
    match builder.get_select(UNIQUE_ID) {
        Some(expr) => expr.to_string(),
        None => match builder.alias() {
            Some(alias) => format!("{alias}.id"),
            None => "id".to_string(),
        },
    }
}

/// Derive the COUNT statement for `builder`.
///
/// Limits and ordering are dropped, and so is grouping when there is no
/// HAVING. Without CTEs the statement wraps the filtered query as a derived
/// table and counts its distinct `unique_id` values (or its rows when
/// `unique` is false). With CTEs the count is taken directly so the `WITH`
/// prologue stays at the top, unless HAVING forces the wrapped form; the
/// derived table then carries its own `WITH`.
pub fn count_query(builder: &QueryBuilder, unique: bool) -> QueryBuilder {
    let mut inner = builder.clone();
    strip_for_count(&mut inner);
    let unique_expr = unique_expression(builder);

    if builder.has_ctes() && builder.raw_having.is_empty() {
        inner.selects.clear();
        let expr = if unique {
            format!("COUNT(DISTINCT {unique_expr})")
        } else {
            "COUNT(*)".to_string()
        };
        inner.select(expr, COUNT_COLUMN).set_distinct(false);
        return inner;
    }

    let expr = if unique {
        inner.selects.clear();
        inner.select(unique_expr, UNIQUE_ID);
        format!("COUNT(DISTINCT {COUNT_ALIAS}.{UNIQUE_ID})")
    } else {
        "COUNT(*)".to_string()
    };
    wrap_count(builder, inner, expr)
}

/// Plain `COUNT(*)` over the filtered query. Only grouped queries with a
/// HAVING clause are wrapped, counting their groups.
pub fn fallback_count_query(builder: &QueryBuilder) -> QueryBuilder {
    let mut query = builder.clone();
    strip_for_count(&mut query);
    if !query.raw_having.is_empty() {
        return wrap_count(builder, query, "COUNT(*)".to_string());
    }
    query.selects.clear();
    query.select("COUNT(*)", COUNT_COLUMN).set_distinct(false);
    query
}

/// Memo of COUNT results for one request.
#[derive(Debug, Default)]
pub struct CountCache {
    entries: Mutex<HashMap<String, u64>>,
}

impl CountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a rendered statement.
    ///
    /// Generated placeholder names differ between renders of the same
    /// builder, so they are renumbered in order of appearance before hashing.
    pub fn key(sql: &str, params: &Params) -> String {
        let mut order: Vec<String> = Vec::new();
        let normalized = GENERATED_PARAM.replace_all(sql, |caps: &regex::Captures<'_>| {
            let name = caps[1].to_string();
            let index = match order.iter().position(|n| *n == name) {
                Some(i) => i,
                None => {
                    order.push(name);
                    order.len() - 1
                }
            };
            format!(":_{index}")
        });

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        for name in &order {
            hasher.update(b"\0");
            if let Some(value) = params.get(name) {
                hasher.update(value.to_string().as_bytes());
            }
        }
        for (name, value) in params {
            if !order.contains(name) {
                hasher.update(b"\0");
                hasher.update(name.as_bytes());
                hasher.update(b"=");
                hasher.update(value.to_string().as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).copied()
    }

    pub fn insert(&self, key: String, count: u64) {
        self.entries.lock().insert(key, count);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Count the rows `builder` would return, memoized in `cache`.
///
/// When the derived statement fails, a plain `COUNT(*)` is tried once. If
/// that fails as well the original error is returned.
pub async fn execute_count(
    storage: &dyn Storage,
    builder: &QueryBuilder,
    unique: bool,
    cache: &CountCache,
) -> EngineResult<u64> {
    let (sql, params) = count_query(builder, unique).build_sql(storage.dialect())?;
    let key = CountCache::key(&sql, &params);
    if let Some(count) = cache.get(&key) {
        tracing::debug!(count, "count served from request cache");
        return Ok(count);
    }

    let err = match storage.fetch_count(&sql, &params).await {
        Ok(count) => {
            cache.insert(key, count);
            return Ok(count);
        }
        Err(err) => err,
    };

    tracing::warn!(error = %err, "count query failed, retrying with plain COUNT(*)");

    let Ok((fallback_sql, fallback_params)) =
        fallback_count_query(builder).build_sql(storage.dialect())
    else {
        return Err(err);
    };

    match storage.fetch_count(&fallback_sql, &fallback_params).await {
        Ok(count) => {
            cache.insert(key, count);
            Ok(count)
        }
        Err(fallback_err) => {
            tracing::error!(error = %fallback_err, "fallback count query failed");
            Err(err)
        }
    }
}
