//! Storage backends.
//!
//! The engine renders statements with named placeholders and hands them to
//! a `Storage`, which rewrites them for its driver, executes them and
//! decodes rows into ordered JSON maps.

mod params;
mod postgres;
mod sqlite;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

pub use params::expand_named_params;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::query::{Dialect, JsonValue, Params};

/// One result row: column name to value, in select order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Query execution backend.
#[async_trait]
pub trait Storage: Send + Sync {
    fn dialect(&self) -> &dyn Dialect;

    /// Execute a statement and decode every row.
    async fn fetch_all(&self, sql: &str, params: &Params) -> EngineResult<Vec<Row>>;

    /// Execute a statement whose first column of the first row is a count.
    async fn fetch_count(&self, sql: &str, params: &Params) -> EngineResult<u64> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.values().next())
            .map(value_as_u64)
            .unwrap_or(0))
    }
}

/// Interpret a decoded cell as a non-negative count.
pub fn value_as_u64(value: &JsonValue) -> u64 {
    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Connect to the backend named by the database URL's scheme.
pub async fn create_storage(config: &EngineConfig) -> Result<Arc<dyn Storage>> {
    let url = config
        .database_url
        .as_deref()
        .context("QUARRY_DATABASE_URL is not set")?;

    if url.starts_with("sqlite:") {
        let storage = SqliteStorage::connect(url, config.database_max_connections).await?;
        return Ok(Arc::new(storage));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let storage = PostgresStorage::connect(url, config.database_max_connections).await?;
        return Ok(Arc::new(storage));
    }

    anyhow::bail!("unsupported database URL scheme: {url}")
}
