//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

/// Default number of rows per page.
const DEFAULT_PER_PAGE: u32 = 10;

/// Hard upper bound for rows per page.
const DEFAULT_MAX_PER_PAGE: u32 = 100;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database connection URL (`sqlite:` or `postgres:` scheme).
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Prefix prepended to physical table names (default: empty).
    pub table_prefix: String,

    /// Rows per page when preferences do not say otherwise (default: 10).
    pub default_per_page: u32,

    /// Maximum rows per page; larger requests are capped (default: 100).
    pub max_per_page: u32,

    /// Separator used when synthesizing `unique_id` from several
    /// identifier fields (default: "-").
    pub unique_id_delimiter: String,

    /// Redis URL for the shared filter-state cache. When None, filter
    /// state lives in process memory only.
    pub redis_url: Option<String>,

    /// Capacity of the in-process cache tier (default: 10 000).
    pub cache_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            table_prefix: String::new(),
            default_per_page: DEFAULT_PER_PAGE,
            max_per_page: DEFAULT_MAX_PER_PAGE,
            unique_id_delimiter: "-".to_string(),
            redis_url: None,
            cache_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let database_url = lookup("QUARRY_DATABASE_URL");

        let database_max_connections = lookup("QUARRY_DATABASE_MAX_CONNECTIONS")
            .map(|v| v.parse())
            .transpose()
            .context("QUARRY_DATABASE_MAX_CONNECTIONS must be a valid u32")?
            .unwrap_or(defaults.database_max_connections);

        let table_prefix = lookup("QUARRY_TABLE_PREFIX").unwrap_or_default();
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("QUARRY_TABLE_PREFIX may only contain letters, digits and underscores");
        }

        let default_per_page = lookup("QUARRY_DEFAULT_PER_PAGE")
            .map(|v| v.parse())
            .transpose()
            .context("QUARRY_DEFAULT_PER_PAGE must be a valid u32")?
            .unwrap_or(defaults.default_per_page);

        let max_per_page = lookup("QUARRY_MAX_PER_PAGE")
            .map(|v| v.parse())
            .transpose()
            .context("QUARRY_MAX_PER_PAGE must be a valid u32")?
            .unwrap_or(defaults.max_per_page);

        let unique_id_delimiter =
            lookup("QUARRY_UNIQUE_ID_DELIMITER").unwrap_or(defaults.unique_id_delimiter);

        let redis_url = lookup("QUARRY_REDIS_URL").filter(|v| !v.trim().is_empty());

        let cache_capacity = lookup("QUARRY_CACHE_CAPACITY")
            .map(|v| v.parse())
            .transpose()
            .context("QUARRY_CACHE_CAPACITY must be a valid u64")?
            .unwrap_or(defaults.cache_capacity);

        Ok(Self {
            database_url,
            database_max_connections,
            table_prefix,
            default_per_page,
            max_per_page,
            unique_id_delimiter,
            redis_url,
            cache_capacity,
        })
    }

    /// Clamp a requested page size to `1..=max_per_page`.
    pub fn clamp_per_page(&self, requested: u32) -> u32 {
        if requested > self.max_per_page {
            tracing::warn!(
                requested = requested,
                capped = self.max_per_page,
                "per_page exceeds maximum, capping"
            );
            return self.max_per_page;
        }
        requested.max(1)
    }
}
