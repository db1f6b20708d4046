//! Query engine types.
//!
//! Provides the shared vocabulary of the query builder:
//! - Params: named placeholder values
//! - Operator: predicate comparison operators
//! - Conjunction, JoinType, SortDirection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// JSON value used for cells, parameters and filter input.
pub type JsonValue = serde_json::Value;

/// Named placeholder values, keyed without the leading colon.
pub type Params = serde_json::Map<String, JsonValue>;

/// Merge `extra` into `params`, later values winning.
pub fn merge_params(params: &mut Params, extra: &Params) {
    for (key, value) in extra {
        params.insert(key.clone(), value.clone());
    }
}

/// Comparison operators for predicates.
///
/// Operators arrive from report definitions as strings. Unknown names are
/// kept as `Unsupported` so a builder can be assembled before every
/// predicate is valid; rendering such a predicate fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    /// `selector = :p`
    Equal,
    /// `selector <> :p`
    NotEqual,
    /// `selector < :p`
    LessThan,
    /// `selector > :p`
    GreaterThan,
    /// `selector <= :p`
    LessOrEqual,
    /// `selector >= :p`
    GreaterOrEqual,
    /// Value in list.
    In,
    /// Value not in list.
    NotIn,
    /// Value in the rows of a sub-query.
    InQuery,
    /// Value not in the rows of a sub-query.
    NotInQuery,
    /// Pattern match with a caller-supplied pattern.
    Like,
    /// Substring match (`%value%`), wildcards in the value escaped.
    LikeWildcard,
    /// Rendered by an attached `PredicateRenderer`.
    Custom,
    /// Operator name not known to the engine.
    Unsupported(String),
}

impl Operator {
    /// Stable configuration name.
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equal => "equal",
            Operator::NotEqual => "not_equal",
            Operator::LessThan => "lt",
            Operator::GreaterThan => "gt",
            Operator::LessOrEqual => "lte",
            Operator::GreaterOrEqual => "gte",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::InQuery => "in_query",
            Operator::NotInQuery => "not_in_query",
            Operator::Like => "like",
            Operator::LikeWildcard => "like_wildcard",
            Operator::Custom => "custom",
            Operator::Unsupported(name) => name,
        }
    }

    /// SQL comparison symbol for the scalar comparison operators.
    pub fn comparison_symbol(&self) -> Option<&'static str> {
        match self {
            Operator::Equal => Some("="),
            Operator::NotEqual => Some("<>"),
            Operator::LessThan => Some("<"),
            Operator::GreaterThan => Some(">"),
            Operator::LessOrEqual => Some("<="),
            Operator::GreaterOrEqual => Some(">="),
            _ => None,
        }
    }
}

impl From<&str> for Operator {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "equal" | "=" | "eq" => Operator::Equal,
            "not_equal" | "<>" | "!=" | "neq" => Operator::NotEqual,
            "lt" | "<" | "less_than" => Operator::LessThan,
            "gt" | ">" | "greater_than" => Operator::GreaterThan,
            "lte" | "<=" | "less_or_equal" => Operator::LessOrEqual,
            "gte" | ">=" | "greater_or_equal" => Operator::GreaterOrEqual,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "in_query" => Operator::InQuery,
            "not_in_query" => Operator::NotInQuery,
            "like" => Operator::Like,
            "like_wildcard" => Operator::LikeWildcard,
            "custom" => Operator::Custom,
            _ => Operator::Unsupported(name.to_string()),
        }
    }
}

impl From<String> for Operator {
    fn from(name: String) -> Self {
        Operator::from(name.as_str())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// How a predicate attaches to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

/// SQL join types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(EngineError::InvalidSortDirection(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn operator_parsing_keeps_unknown_names() {
        assert_eq!(Operator::from("IN"), Operator::In);
        assert_eq!(Operator::from(">="), Operator::GreaterOrEqual);
        assert_eq!(
            Operator::from("between"),
            Operator::Unsupported("between".to_string())
        );
    }

    #[test]
    fn operator_serialization() {
        let json = serde_json::to_string(&Operator::LikeWildcard).unwrap();
        assert_eq!(json, "\"like_wildcard\"");

        let parsed: Operator = serde_json::from_str("\"not_in_query\"").unwrap();
        assert_eq!(parsed, Operator::NotInQuery);

        let unknown: Operator = serde_json::from_str("\"regex\"").unwrap();
        assert_eq!(unknown, Operator::Unsupported("regex".to_string()));
    }

    #[test]
    fn operator_display_is_upper_case() {
        assert_eq!(Operator::Equal.to_string(), "EQUAL");
        assert_eq!(Operator::NotInQuery.to_string(), "NOT_IN_QUERY");
    }

    #[test]
    fn sort_direction_parsing() {
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert_eq!(" asc ".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        let err = "sideways".parse::<SortDirection>().unwrap_err();
        assert!(matches!(err, EngineError::InvalidSortDirection(_)));
    }

    #[test]
    fn merge_params_overwrites() {
        let mut a = Params::new();
        a.insert("x".into(), JsonValue::from(1));
        let mut b = Params::new();
        b.insert("x".into(), JsonValue::from(2));
        b.insert("y".into(), JsonValue::from(3));
        merge_params(&mut a, &b);
        assert_eq!(a["x"], JsonValue::from(2));
        assert_eq!(a.len(), 2);
    }
}
