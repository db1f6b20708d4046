//! Named-to-positional placeholder expansion.
//!
//! Statements are rendered with `:name` placeholders. Backends want
//! positional ones, so each distinct name is assigned the next index on
//! first appearance and re-uses it afterwards.

use crate::error::{EngineError, EngineResult};
use crate::query::{Dialect, JsonValue, Params};

/// Rewrite `:name` placeholders for `dialect` and return the values in
/// positional order.
///
/// Quoted strings, quoted identifiers and `::` casts are left alone. A
/// placeholder with no value in `params` is a configuration error.
pub fn expand_named_params(
    sql: &str,
    params: &Params,
    dialect: &dyn Dialect,
) -> EngineResult<(String, Vec<JsonValue>)> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut values: Vec<JsonValue> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();

                let index = match names.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        let value = params.get(&name).ok_or_else(|| {
                            EngineError::Config(format!("no value bound for parameter :{name}"))
                        })?;
                        names.push(name);
                        values.push(value.clone());
                        names.len()
                    }
                };
                out.push_str(&dialect.positional_placeholder(index));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok((out, values))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::{PostgresDialect, SqliteDialect};

    fn params(pairs: &[(&str, JsonValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn rewrites_in_order_of_appearance() {
        let p = params(&[("b", 2.into()), ("a", 1.into())]);
        let (sql, values) =
            expand_named_params("SELECT * FROM t WHERE a = :a AND b = :b", &p, &PostgresDialect)
                .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(values, vec![JsonValue::from(1), JsonValue::from(2)]);
    }

    #[test]
    fn repeated_names_share_an_index() {
        let p = params(&[("uid", 7.into())]);
        let (sql, values) = expand_named_params(
            "SELECT * FROM t WHERE a = :uid OR b = :uid",
            &p,
            &SqliteDialect,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = ?1 OR b = ?1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn skips_literals_and_casts() {
        let p = params(&[("x", "v".into())]);
        let (sql, values) = expand_named_params(
            "SELECT ':nope', \"a:b\", c::text FROM t WHERE d = :x",
            &p,
            &PostgresDialect,
        )
        .unwrap();
        assert_eq!(sql, "SELECT ':nope', \"a:b\", c::text FROM t WHERE d = $1");
        assert_eq!(values, vec![JsonValue::from("v")]);
    }

    #[test]
    fn escaped_quotes_stay_inside_literal() {
        let p = params(&[("x", 1.into())]);
        let (sql, _) =
            expand_named_params("SELECT 'it''s :x' WHERE y = :x", &p, &SqliteDialect).unwrap();
        assert_eq!(sql, "SELECT 'it''s :x' WHERE y = ?1");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = expand_named_params("SELECT :missing", &Params::new(), &SqliteDialect)
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
