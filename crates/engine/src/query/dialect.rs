//! SQL dialect abstraction.
//!
//! Rendering is dialect-neutral apart from a handful of seams: identifier
//! quoting, positional placeholders, string concatenation, case-insensitive
//! matching and `IN` expansion.

use std::fmt;

use super::placeholder::next_param_name;
use super::types::{JsonValue, Params};

pub trait Dialect: Send + Sync + fmt::Debug {
    /// Dialect name, for logs.
    fn name(&self) -> &'static str;

    /// Quote a table or column for use in SQL.
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a string literal.
    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Positional placeholder for the given 1-based index.
    fn positional_placeholder(&self, index: usize) -> String;

    /// Render an expression converted to text.
    fn cast_to_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    /// Concatenate SQL expressions.
    fn concat(&self, parts: &[String]) -> String {
        parts.join(" || ")
    }

    /// Keyword for case-insensitive pattern matching.
    fn case_insensitive_like(&self) -> &'static str {
        "LIKE"
    }

    /// `LIMIT`/`OFFSET` tail. `limit` of None means no upper bound.
    fn limit_offset(&self, limit: Option<u64>, offset: u64) -> String {
        match (limit, offset) {
            (Some(n), 0) => format!("LIMIT {n}"),
            (Some(n), m) => format!("LIMIT {n} OFFSET {m}"),
            (None, 0) => String::new(),
            (None, m) => format!("LIMIT -1 OFFSET {m}"),
        }
    }

    /// Expand `selector IN (...)` with one named placeholder per value.
    ///
    /// A single value renders as a plain comparison. Callers must reject
    /// empty value lists before calling.
    fn in_or_equal(&self, selector: &str, values: &[JsonValue], negate: bool) -> (String, Params) {
        let mut params = Params::new();
        if let [value] = values {
            let name = next_param_name();
            params.insert(name.clone(), value.clone());
            let op = if negate { "<>" } else { "=" };
            return (format!("{selector} {op} :{name}"), params);
        }

        let placeholders: Vec<String> = values
            .iter()
            .map(|value| {
                let name = next_param_name();
                params.insert(name.clone(), value.clone());
                format!(":{name}")
            })
            .collect();
        let op = if negate { "NOT IN" } else { "IN" };
        (format!("{selector} {op} ({})", placeholders.join(", ")), params)
    }
}

/// SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn positional_placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn positional_placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn cast_to_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS VARCHAR)")
    }

    fn case_insensitive_like(&self) -> &'static str {
        "ILIKE"
    }

    fn limit_offset(&self, limit: Option<u64>, offset: u64) -> String {
        match (limit, offset) {
            (Some(n), 0) => format!("LIMIT {n}"),
            (Some(n), m) => format!("LIMIT {n} OFFSET {m}"),
            (None, 0) => String::new(),
            (None, m) => format!("OFFSET {m}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        let d = PostgresDialect;
        assert_eq!(d.quote_identifier("user"), "\"user\"");
        assert_eq!(d.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(d.quote_string("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn positional_placeholders() {
        assert_eq!(SqliteDialect.positional_placeholder(3), "?3");
        assert_eq!(PostgresDialect.positional_placeholder(3), "$3");
    }

    #[test]
    fn in_or_equal_single_value() {
        let (sql, params) = SqliteDialect.in_or_equal("c.id", &[JsonValue::from(5)], false);
        let name = params.keys().next().cloned().unwrap_or_default();
        assert_eq!(sql, format!("c.id = :{name}"));
        assert_eq!(params[&name], JsonValue::from(5));
    }

    #[test]
    fn in_or_equal_many_values() {
        let values = [JsonValue::from(1), JsonValue::from(2), JsonValue::from(3)];
        let (sql, params) = PostgresDialect.in_or_equal("c.id", &values, true);
        assert!(sql.starts_with("c.id NOT IN (:"));
        assert_eq!(params.len(), 3);
        for name in params.keys() {
            assert!(sql.contains(&format!(":{name}")));
        }
    }

    #[test]
    fn offset_without_limit() {
        assert_eq!(SqliteDialect.limit_offset(None, 5), "LIMIT -1 OFFSET 5");
        assert_eq!(PostgresDialect.limit_offset(None, 5), "OFFSET 5");
        assert_eq!(SqliteDialect.limit_offset(Some(2), 5), "LIMIT 2 OFFSET 5");
        assert_eq!(PostgresDialect.limit_offset(None, 0), "");
    }

    #[test]
    fn concat_and_cast() {
        let d = SqliteDialect;
        let parts = vec![d.cast_to_text("u.id"), d.quote_string("-"), d.cast_to_text("g.id")];
        assert_eq!(
            d.concat(&parts),
            "CAST(u.id AS TEXT) || '-' || CAST(g.id AS TEXT)"
        );
    }
}
