//! Predicate rendering.
//!
//! A predicate is one comparison in a WHERE clause. It renders to an SQL
//! fragment plus named parameters, with placeholder names drawn from the
//! process-wide counter.

use std::fmt;
use std::sync::Arc;

use super::dialect::Dialect;
use super::placeholder::next_param_name;
use super::types::{Conjunction, JsonValue, Operator, Params, merge_params};
use crate::error::{EngineError, EngineResult};

/// Sub-query attached to an `InQuery`/`NotInQuery` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub sql: String,
    pub params: Params,
}

/// Renderer for predicates using `Operator::Custom`.
pub trait PredicateRenderer: Send + Sync + fmt::Debug {
    fn render(&self, predicate: &Predicate, dialect: &dyn Dialect) -> EngineResult<(String, Params)>;
}

/// A single comparison.
#[derive(Debug, Clone)]
pub struct Predicate {
    selector: String,
    operator: Operator,
    values: Vec<JsonValue>,
    subquery: Option<SubQuery>,
    conjunction: Conjunction,
    raw_conditions: Vec<(String, Params)>,
    renderer: Option<Arc<dyn PredicateRenderer>>,
}

impl Predicate {
    /// Create a predicate. Nested arrays in `values` are flattened one level.
    pub fn new(
        selector: impl Into<String>,
        values: Vec<JsonValue>,
        operator: Operator,
        conjunction: Conjunction,
    ) -> Self {
        let values = values
            .into_iter()
            .flat_map(|v| match v {
                JsonValue::Array(items) => items,
                other => vec![other],
            })
            .collect();

        Self {
            selector: selector.into(),
            operator,
            values,
            subquery: None,
            conjunction,
            raw_conditions: Vec::new(),
            renderer: None,
        }
    }

    /// Attach a sub-query (for `InQuery`/`NotInQuery`).
    pub fn set_subquery(&mut self, sql: impl Into<String>, params: Params) -> &mut Self {
        self.subquery = Some(SubQuery {
            sql: sql.into(),
            params,
        });
        self
    }

    /// Append a raw condition ANDed into this predicate's fragment.
    pub fn and_raw(&mut self, sql: impl Into<String>, params: Params) -> &mut Self {
        self.raw_conditions.push((sql.into(), params));
        self
    }

    /// Attach the renderer used by `Operator::Custom`.
    pub fn set_renderer(&mut self, renderer: Arc<dyn PredicateRenderer>) -> &mut Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn subquery(&self) -> Option<&SubQuery> {
        self.subquery.as_ref()
    }

    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    fn empty(&self) -> EngineError {
        EngineError::EmptyPredicate {
            selector: self.selector.clone(),
            operator: self.operator.to_string(),
        }
    }

    fn first_value(&self) -> EngineResult<&JsonValue> {
        self.values.first().ok_or_else(|| self.empty())
    }

    /// Render to an SQL fragment and its parameters.
    pub fn to_sql(&self, dialect: &dyn Dialect) -> EngineResult<(String, Params)> {
        let (sql, mut params) = match &self.operator {
            Operator::Equal
            | Operator::NotEqual
            | Operator::LessThan
            | Operator::GreaterThan
            | Operator::LessOrEqual
            | Operator::GreaterOrEqual => {
                let value = self.first_value()?;
                let symbol = self.operator.comparison_symbol().unwrap_or("=");
                let name = next_param_name();
                let mut params = Params::new();
                params.insert(name.clone(), value.clone());
                (format!("{} {symbol} :{name}", self.selector), params)
            }
            Operator::In | Operator::NotIn => {
                if self.values.is_empty() {
                    return Err(self.empty());
                }
                dialect.in_or_equal(
                    &self.selector,
                    &self.values,
                    self.operator == Operator::NotIn,
                )
            }
            Operator::InQuery | Operator::NotInQuery => {
                let subquery = self.subquery.as_ref().ok_or_else(|| self.empty())?;
                let not = if self.operator == Operator::NotInQuery {
                    "NOT "
                } else {
                    ""
                };
                (
                    format!("{} {not}IN ({})", self.selector, subquery.sql),
                    subquery.params.clone(),
                )
            }
            Operator::Like => {
                let value = self.first_value()?;
                let name = next_param_name();
                let mut params = Params::new();
                params.insert(name.clone(), value.clone());
                (
                    format!(
                        "{} {} :{name}",
                        self.selector,
                        dialect.case_insensitive_like()
                    ),
                    params,
                )
            }
            Operator::LikeWildcard => {
                let value = self.first_value()?;
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let name = next_param_name();
                let mut params = Params::new();
                params.insert(
                    name.clone(),
                    JsonValue::String(format!("%{}%", escape_like_wildcards(&text))),
                );
                (
                    format!(
                        "{} {} :{name} ESCAPE '\\'",
                        self.selector,
                        dialect.case_insensitive_like()
                    ),
                    params,
                )
            }
            Operator::Custom => {
                let renderer = self
                    .renderer
                    .as_ref()
                    .ok_or_else(|| EngineError::CustomOperatorNotImplemented(self.selector.clone()))?;
                renderer.render(self, dialect)?
            }
            Operator::Unsupported(name) => {
                return Err(EngineError::UnsupportedOperator {
                    selector: self.selector.clone(),
                    operator: name.clone(),
                });
            }
        };

        if self.raw_conditions.is_empty() {
            return Ok((sql, params));
        }

        let mut parts = vec![sql];
        for (raw, raw_params) in &self.raw_conditions {
            parts.push(raw.clone());
            merge_params(&mut params, raw_params);
        }
        Ok((format!("({})", parts.join(" AND ")), params))
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
pub fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::dialect::{PostgresDialect, SqliteDialect};
    use std::collections::HashSet;

    fn only_param(params: &Params) -> (String, JsonValue) {
        assert_eq!(params.len(), 1, "expected one param: {params:?}");
        let (k, v) = params.iter().next().unwrap();
        (k.clone(), v.clone())
    }

    #[test]
    fn equal_renders_named_placeholder() {
        let p = Predicate::new("c.id", vec![5.into()], Operator::Equal, Conjunction::And);
        let (sql, params) = p.to_sql(&SqliteDialect).unwrap();
        let (name, value) = only_param(&params);
        assert_eq!(sql, format!("c.id = :{name}"));
        assert_eq!(value, JsonValue::from(5));
    }

    #[test]
    fn comparison_symbols() {
        for (op, symbol) in [
            (Operator::NotEqual, "<>"),
            (Operator::LessThan, "<"),
            (Operator::GreaterThan, ">"),
            (Operator::LessOrEqual, "<="),
            (Operator::GreaterOrEqual, ">="),
        ] {
            let p = Predicate::new("t.n", vec![1.into()], op, Conjunction::And);
            let (sql, _) = p.to_sql(&SqliteDialect).unwrap();
            assert!(sql.starts_with(&format!("t.n {symbol} :")), "{sql}");
        }
    }

    #[test]
    fn empty_values_fail_instead_of_matching_everything() {
        for op in [Operator::Equal, Operator::In, Operator::NotIn, Operator::Like] {
            let p = Predicate::new("c.id", vec![], op, Conjunction::And);
            let err = p.to_sql(&SqliteDialect).unwrap_err();
            assert!(matches!(err, EngineError::EmptyPredicate { .. }), "{err:?}");
        }
    }

    #[test]
    fn placeholders_unique_for_identical_predicates() {
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let p = Predicate::new("c.id", vec![1.into()], Operator::Equal, Conjunction::And);
            let (_, params) = p.to_sql(&SqliteDialect).unwrap();
            for name in params.keys() {
                assert!(seen.insert(name.clone()), "placeholder reused: {name}");
            }
        }
    }

    #[test]
    fn in_flattens_nested_lists() {
        let p = Predicate::new(
            "c.id",
            vec![serde_json::json!([1, 2]), 3.into()],
            Operator::In,
            Conjunction::And,
        );
        assert_eq!(p.values().len(), 3);
        let (sql, params) = p.to_sql(&SqliteDialect).unwrap();
        assert!(sql.starts_with("c.id IN ("));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn in_query_merges_subquery_params() {
        let mut sub_params = Params::new();
        sub_params.insert("uid".into(), 7.into());
        let mut p = Predicate::new("c.id", vec![], Operator::NotInQuery, Conjunction::And);
        p.set_subquery("SELECT e.courseid FROM enrol e WHERE e.userid = :uid", sub_params);
        let (sql, params) = p.to_sql(&SqliteDialect).unwrap();
        assert_eq!(
            sql,
            "c.id NOT IN (SELECT e.courseid FROM enrol e WHERE e.userid = :uid)"
        );
        assert_eq!(params["uid"], JsonValue::from(7));
    }

    #[test]
    fn in_query_without_subquery_is_empty() {
        let p = Predicate::new("c.id", vec![], Operator::InQuery, Conjunction::And);
        assert!(matches!(
            p.to_sql(&SqliteDialect),
            Err(EngineError::EmptyPredicate { .. })
        ));
    }

    #[test]
    fn like_wildcard_escapes_and_wraps() {
        let p = Predicate::new(
            "c.fullname",
            vec!["100%_done".into()],
            Operator::LikeWildcard,
            Conjunction::And,
        );
        let (sql, params) = p.to_sql(&PostgresDialect).unwrap();
        let (name, value) = only_param(&params);
        assert_eq!(sql, format!("c.fullname ILIKE :{name} ESCAPE '\\'"));
        assert_eq!(value, JsonValue::from("%100\\%\\_done%"));
    }

    #[test]
    fn unsupported_operator_fails_at_render_time() {
        let p = Predicate::new("c.id", vec![1.into()], Operator::from("between"), Conjunction::And);
        let err = p.to_sql(&SqliteDialect).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperator { .. }));
    }

    #[derive(Debug)]
    struct IsNull;

    impl PredicateRenderer for IsNull {
        fn render(&self, p: &Predicate, _: &dyn Dialect) -> EngineResult<(String, Params)> {
            Ok((format!("{} IS NULL", p.selector()), Params::new()))
        }
    }

    #[test]
    fn custom_operator_requires_renderer() {
        let mut p = Predicate::new("u.deleted", vec![], Operator::Custom, Conjunction::And);
        assert!(matches!(
            p.to_sql(&SqliteDialect),
            Err(EngineError::CustomOperatorNotImplemented(_))
        ));

        p.set_renderer(Arc::new(IsNull));
        let (sql, _) = p.to_sql(&SqliteDialect).unwrap();
        assert_eq!(sql, "u.deleted IS NULL");
    }

    #[test]
    fn raw_conditions_are_anded() {
        let mut raw = Params::new();
        raw.insert("vis".into(), 1.into());
        let mut p = Predicate::new("c.category", vec![3.into()], Operator::Equal, Conjunction::And);
        p.and_raw("c.visible = :vis", raw);
        let (sql, params) = p.to_sql(&SqliteDialect).unwrap();
        assert!(sql.starts_with("(c.category = :"));
        assert!(sql.ends_with(" AND c.visible = :vis)"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn escape_like_wildcards_function() {
        assert_eq!(escape_like_wildcards("hello"), "hello");
        assert_eq!(escape_like_wildcards("100%"), "100\\%");
        assert_eq!(escape_like_wildcards("a_b"), "a\\_b");
        assert_eq!(escape_like_wildcards("a\\b"), "a\\\\b");
    }
}
