//! Shared id-to-label lookups for linked data.
//!
//! Attributes never query storage while transforming. The orchestrator
//! collects every id a page needs and fills the cache with one query per
//! lookup first; attributes then read from the cache synchronously.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::db::Storage;
use crate::error::{EngineError, EngineResult};
use crate::query::{Conjunction, JsonValue, Operator, QueryBuilder};

static SHARED: LazyLock<Arc<LookupCache>> = LazyLock::new(|| Arc::new(LookupCache::new()));

/// Validate a SQL identifier name (table/column names).
/// Allows only `[a-zA-Z_][a-zA-Z0-9_]*` with max 63 chars (PostgreSQL limit).
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

/// Where labels for a set of ids live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupSpec {
    pub table: String,
    pub key_column: String,
    pub label_column: String,
    pub table_prefix: String,
}

/// `(qualified table, key column, label column)`.
type LookupKey = (String, String, String);

impl LookupSpec {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        label_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            label_column: label_column.into(),
            table_prefix: String::new(),
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Physical table name.
    pub fn qualified_table(&self) -> String {
        format!("{}{}", self.table_prefix, self.table)
    }

    fn cache_key(&self) -> LookupKey {
        (
            self.qualified_table(),
            self.key_column.clone(),
            self.label_column.clone(),
        )
    }

    fn validate(&self) -> EngineResult<()> {
        for ident in [&self.qualified_table(), &self.key_column, &self.label_column] {
            if !is_safe_identifier(ident) {
                return Err(EngineError::Config(format!("unsafe lookup identifier: {ident}")));
            }
        }
        Ok(())
    }
}

/// Append-only label cache keyed by table, key column and label column.
#[derive(Debug, Default)]
pub struct LookupCache {
    entries: DashMap<LookupKey, HashMap<String, String>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance.
    pub fn shared() -> Arc<LookupCache> {
        Arc::clone(&SHARED)
    }

    pub fn get(&self, spec: &LookupSpec, id: &str) -> Option<String> {
        self.entries
            .get(&spec.cache_key())
            .and_then(|labels| labels.get(id).cloned())
    }

    pub fn contains(&self, spec: &LookupSpec, id: &str) -> bool {
        self.entries
            .get(&spec.cache_key())
            .is_some_and(|labels| labels.contains_key(id))
    }

    pub fn insert_many(&self, spec: &LookupSpec, labels: impl IntoIterator<Item = (String, String)>) {
        self.entries
            .entry(spec.cache_key())
            .or_default()
            .extend(labels);
    }

    /// Load labels for `ids` not cached yet, in a single query.
    pub async fn prefetch(
        &self,
        storage: &dyn Storage,
        spec: &LookupSpec,
        ids: &BTreeSet<String>,
    ) -> EngineResult<()> {
        let missing: Vec<JsonValue> = ids
            .iter()
            .filter(|id| !self.contains(spec, id))
            .map(|id| JsonValue::from(id.as_str()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        spec.validate()?;

        let key = storage
            .dialect()
            .cast_to_text(&format!("l.{}", spec.key_column));
        let mut qb = QueryBuilder::with_prefix(spec.table_prefix.as_str());
        qb.select(key.as_str(), "k")
            .select(format!("l.{}", spec.label_column), "label")
            .from(spec.table.as_str(), "l")
            .set_distinct(false);
        qb.where_(key, missing, Operator::In, Conjunction::And);
        let (sql, params) = qb.build_sql(storage.dialect())?;
        let rows = storage.fetch_all(&sql, &params).await?;

        let labels = rows.into_iter().filter_map(|row| {
            let key = cell_text(row.get("k")?)?;
            let label = row.get("label").and_then(cell_text).unwrap_or_default();
            Some((key, label))
        });
        self.insert_many(spec, labels);

        tracing::debug!(table = %spec.table, "lookup labels prefetched");
        Ok(())
    }
}

fn cell_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Ids held by a cell: an array, a comma-separated string, or one scalar.
pub fn parse_ids(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(items) => items.iter().filter_map(cell_text).collect(),
        JsonValue::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        other => vec![other.to_string()],
    }
}
