//! SQLite storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};

use super::{Row, Storage, expand_named_params};
use crate::error::{EngineError, EngineResult};
use crate::query::{Dialect, JsonValue, Params, SqliteDialect};

/// Storage backed by a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect,
        }
    }

    /// Open a pool. In-memory databases are per connection, so callers
    /// using `sqlite::memory:` should pass `max_connections = 1`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("failed to connect to SQLite")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_json_params<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[JsonValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            JsonValue::String(s) => query.bind(s.clone()),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Null => query.bind(Option::<String>::None),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Decode a row by the runtime storage class of each value.
fn row_to_json(row: &SqliteRow) -> Row {
    let mut map = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let type_name = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => None,
            Ok(raw) => Some(raw.type_info().name().to_string()),
            Err(_) => None,
        };

        let value = match type_name.as_deref() {
            None => JsonValue::Null,
            Some("INTEGER" | "BOOLEAN" | "INT8") => row
                .try_get::<i64, _>(i)
                .ok()
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            Some("REAL" | "NUMERIC") => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Some("BLOB") => row
                .try_get::<Vec<u8>, _>(i)
                .ok()
                .map(|bytes| JsonValue::String(hex::encode(bytes)))
                .unwrap_or(JsonValue::Null),
            Some(_) => row
                .try_get::<String, _>(i)
                .ok()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

#[async_trait]
impl Storage for SqliteStorage {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn fetch_all(&self, sql: &str, params: &Params) -> EngineResult<Vec<Row>> {
        let (positional, values) = expand_named_params(sql, params, &self.dialect)?;
        tracing::debug!(sql = %positional, params = values.len(), "executing sqlite query");

        let rows = bind_json_params(sqlx::query(&positional), &values)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::execution(e, sql, params))?;

        Ok(rows.iter().map(row_to_json).collect())
    }
}
