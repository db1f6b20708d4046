//! PostgreSQL storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo};

use super::{Row, Storage, expand_named_params};
use crate::error::{EngineError, EngineResult};
use crate::query::{Dialect, JsonValue, Params, PostgresDialect};

/// Storage backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    dialect: PostgresDialect,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            dialect: PostgresDialect,
        }
    }

    /// Create a PostgreSQL connection pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_json_params<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    values: &[JsonValue],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            JsonValue::String(s) => query.bind(s.clone()),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Null => query.bind(Option::<String>::None),
            // Arrays/objects: bind as JSON
            other => query.bind(other.clone()),
        };
    }
    query
}

/// Decode a row using column type metadata.
fn row_to_json(row: &PgRow) -> Row {
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        let value = match col.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(name)
                .ok()
                .flatten()
                .map(JsonValue::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(name)
                .ok()
                .flatten()
                .map(JsonValue::from),
            "INT4" => row
                .try_get::<Option<i32>, _>(name)
                .ok()
                .flatten()
                .map(JsonValue::from),
            "INT8" => row
                .try_get::<Option<i64>, _>(name)
                .ok()
                .flatten()
                .map(JsonValue::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(name)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(JsonValue::Number),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(name)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number),
            "JSON" | "JSONB" => row
                .try_get::<Option<JsonValue>, _>(name)
                .ok()
                .flatten(),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(name)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(name)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.to_string())),
            _ => row
                .try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(JsonValue::String),
        };
        map.insert(name.to_string(), value.unwrap_or(JsonValue::Null));
    }
    map
}

#[async_trait]
impl Storage for PostgresStorage {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn fetch_all(&self, sql: &str, params: &Params) -> EngineResult<Vec<Row>> {
        let (positional, values) = expand_named_params(sql, params, &self.dialect)?;
        tracing::debug!(sql = %positional, params = values.len(), "executing postgres query");

        let rows = bind_json_params(sqlx::query(&positional), &values)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::execution(e, sql, params))?;

        Ok(rows.iter().map(row_to_json).collect())
    }
}
