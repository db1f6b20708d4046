//! Named set of filters for one report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Filter, FilterClause, FilterContext};
use crate::cache::UserCache;
use crate::db::Storage;
use crate::error::{EngineError, EngineResult};
use crate::query::{Dialect, JsonValue, Params, merge_params};

/// SQL for one clause, filters joined with `AND`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseSql {
    pub sql: String,
    pub params: Params,
}

impl ClauseSql {
    fn from_parts(parts: Vec<(String, Params)>) -> Self {
        if parts.is_empty() {
            return Self {
                sql: "1=1".to_string(),
                params: Params::new(),
            };
        }
        let mut params = Params::new();
        let mut sql = Vec::with_capacity(parts.len());
        for (fragment, fragment_params) in parts {
            sql.push(fragment);
            merge_params(&mut params, &fragment_params);
        }
        Self {
            sql: sql.join(" AND "),
            params,
        }
    }

    /// Whether this clause restricts anything.
    pub fn is_trivial(&self) -> bool {
        self.sql == "1=1"
    }
}

/// Output of `FilterCollection::get_sql_and_params`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSql {
    pub where_clause: ClauseSql,
    pub having_clause: ClauseSql,
}

/// Serializable user selections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub values: BTreeMap<String, JsonValue>,
}

/// Cache key for a user's filter state.
pub fn filter_cache_key(user_id: i64, identifier: &str) -> String {
    format!("quarry:filters:{user_id}:{identifier}")
}

#[derive(Debug)]
pub struct FilterCollection {
    identifier: String,
    filters: Vec<Filter>,
    context: FilterContext,
    initialized: bool,
}

impl FilterCollection {
    pub fn new(identifier: impl Into<String>, context: FilterContext) -> Self {
        Self {
            identifier: identifier.into(),
            filters: Vec::new(),
            context,
            initialized: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn context(&self) -> &FilterContext {
        &self.context
    }

    pub fn set_context(&mut self, context: FilterContext) {
        self.context = context;
    }

    pub fn add_filter(&mut self, filter: Filter) -> EngineResult<()> {
        if self.has_filter(filter.name()) {
            return Err(EngineError::DuplicateFilter(filter.name().to_string()));
        }
        self.filters.push(filter);
        Ok(())
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name() == name)
    }

    pub fn get_filter(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name() == name)
    }

    pub fn get_filter_mut(&mut self, name: &str) -> Option<&mut Filter> {
        self.filters.iter_mut().find(|f| f.name() == name)
    }

    /// Remove a filter (conditions included).
    pub fn remove_filter(&mut self, name: &str) -> Option<Filter> {
        let index = self.filters.iter().position(|f| f.name() == name)?;
        Some(self.filters.remove(index))
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run every handler's async preparation once.
    pub async fn init(&mut self, storage: &dyn Storage) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        for filter in &mut self.filters {
            filter.handler_mut().init(storage, &self.context).await?;
        }
        self.initialized = true;
        tracing::debug!(
            collection = %self.identifier,
            filters = self.filters.len(),
            "filter collection initialized"
        );
        Ok(())
    }

    /// Apply a user value. Empty input is ignored and reported as `false`;
    /// so is input for a condition.
    pub fn apply_filter(&mut self, name: &str, value: JsonValue) -> EngineResult<bool> {
        let is_empty = match &value {
            JsonValue::Null => true,
            JsonValue::String(s) => s.is_empty(),
            JsonValue::Array(items) => items.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(false);
        }

        let filter = self
            .get_filter_mut(name)
            .ok_or_else(|| EngineError::UnknownFilter(name.to_string()))?;
        if filter.is_condition() {
            return Ok(false);
        }
        filter.set_raw_value(value)?;
        Ok(true)
    }

    /// Apply several values; returns how many were applied.
    pub fn apply_filters(
        &mut self,
        values: impl IntoIterator<Item = (String, JsonValue)>,
    ) -> EngineResult<usize> {
        let mut applied = 0;
        for (name, value) in values {
            if self.apply_filter(&name, value)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    pub fn get_applied_filters(&self) -> Vec<&Filter> {
        self.filters.iter().filter(|f| f.is_applied()).collect()
    }

    /// Whether any user-facing filter is applied. Conditions do not count.
    pub fn has_any_filter_applied(&self) -> bool {
        self.filters
            .iter()
            .any(|f| !f.is_condition() && f.is_applied())
    }

    /// Render every filter into its clause.
    pub fn get_sql_and_params(&self, dialect: &dyn Dialect) -> EngineResult<FilterSql> {
        let mut where_parts = Vec::new();
        let mut having_parts = Vec::new();

        for filter in &self.filters {
            let Some(predicate) = filter.predicate(&self.context)? else {
                continue;
            };
            let rendered = predicate.to_sql(dialect)?;
            match filter.clause() {
                FilterClause::Where => where_parts.push(rendered),
                FilterClause::Having => having_parts.push(rendered),
            }
        }

        Ok(FilterSql {
            where_clause: ClauseSql::from_parts(where_parts),
            having_clause: ClauseSql::from_parts(having_parts),
        })
    }

    /// Current user selections.
    pub fn state(&self) -> FilterState {
        FilterState {
            values: self
                .filters
                .iter()
                .filter(|f| !f.is_condition())
                .filter_map(|f| Some((f.name().to_string(), f.raw_value()?.clone())))
                .collect(),
        }
    }

    /// Restore selections. Unknown filters and values that no longer
    /// validate are skipped.
    pub fn restore_state(&mut self, state: &FilterState) {
        for (name, value) in &state.values {
            if let Err(e) = self.apply_filter(name, value.clone()) {
                tracing::warn!(filter = %name, error = %e, "dropping stale filter state");
            }
        }
    }

    pub fn cache_key(&self) -> String {
        filter_cache_key(self.context.user_id, &self.identifier)
    }

    /// Store the current selections for the user.
    pub async fn cache(&self, cache: &dyn UserCache) -> EngineResult<()> {
        let json = serde_json::to_string(&self.state())
            .map_err(|e| EngineError::Cache(e.to_string()))?;
        cache.set(&self.cache_key(), &json).await;
        Ok(())
    }

    /// Restore cached selections. Returns whether anything was found.
    pub async fn load_cache(&mut self, cache: &dyn UserCache) -> EngineResult<bool> {
        let Some(json) = cache.get(&self.cache_key()).await else {
            return Ok(false);
        };
        let state: FilterState =
            serde_json::from_str(&json).map_err(|e| EngineError::Cache(e.to_string()))?;
        self.restore_state(&state);
        Ok(true)
    }

    pub async fn delete_cache(&self, cache: &dyn UserCache) {
        cache.delete(&self.cache_key()).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::filter::{MyGroupsCondition, TextFilter};
    use crate::query::{Operator, SqliteDialect};

    fn collection() -> FilterCollection {
        let mut c = FilterCollection::new("test", FilterContext::new(3));
        c.add_filter(Filter::new("filter1", "t.f")).unwrap();
        c
    }

    #[test]
    fn apply_then_render_where_group() {
        let mut c = collection();
        assert!(c.apply_filter("filter1", 123.into()).unwrap());

        let sql = c.get_sql_and_params(&SqliteDialect).unwrap();
        let name = sql.where_clause.params.keys().next().unwrap().clone();
        assert_eq!(sql.where_clause.sql, format!("t.f = :{name}"));
        assert_eq!(sql.where_clause.params.len(), 1);
        assert_eq!(sql.where_clause.params[&name], JsonValue::from(123));
        assert!(sql.having_clause.is_trivial());
    }

    #[test]
    fn empty_value_is_rejected_and_changes_nothing() {
        let mut c = collection();
        c.apply_filter("filter1", 123.into()).unwrap();
        let before = c.state();

        assert!(!c.apply_filter("filter1", "".into()).unwrap());
        assert_eq!(c.state(), before);
        assert!(c.has_any_filter_applied());
    }

    #[test]
    fn nothing_applied_renders_tautology() {
        let c = collection();
        let sql = c.get_sql_and_params(&SqliteDialect).unwrap();
        assert_eq!(sql.where_clause.sql, "1=1");
        assert!(sql.where_clause.params.is_empty());
        assert!(!c.has_any_filter_applied());
        assert!(c.get_applied_filters().is_empty());
    }

    #[test]
    fn duplicate_and_unknown_filters() {
        let mut c = collection();
        assert!(matches!(
            c.add_filter(Filter::new("filter1", "t.g")),
            Err(EngineError::DuplicateFilter(_))
        ));
        assert!(matches!(
            c.apply_filter("nope", 1.into()),
            Err(EngineError::UnknownFilter(_))
        ));
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut c = collection();
        c.apply_filter("filter1", 5.into()).unwrap();
        let first = c.get_sql_and_params(&SqliteDialect).unwrap();
        c.apply_filter("filter1", 5.into()).unwrap();
        let second = c.get_sql_and_params(&SqliteDialect).unwrap();

        assert_eq!(
            first.where_clause.params.values().collect::<Vec<_>>(),
            second.where_clause.params.values().collect::<Vec<_>>()
        );
        assert_eq!(c.get_applied_filters().len(), 1);
    }

    #[test]
    fn conditions_are_always_applied_and_ignore_input() {
        let mut c = collection();
        c.add_filter(Filter::new("groups", "g.id").with_handler(MyGroupsCondition))
            .unwrap();
        assert!(!c.apply_filter("groups", 9.into()).unwrap());
        assert_eq!(c.get_applied_filters().len(), 1);
        assert!(!c.has_any_filter_applied());

        let sql = c.get_sql_and_params(&SqliteDialect).unwrap();
        assert_eq!(sql.where_clause.sql, "1 = 0");
    }

    #[test]
    fn having_filters_render_separately() {
        let mut c = collection();
        c.add_filter(
            Filter::new("min_members", "COUNT(gm.id)")
                .with_operator(Operator::GreaterOrEqual)
                .with_clause(FilterClause::Having),
        )
        .unwrap();
        c.apply_filter("min_members", 2.into()).unwrap();
        c.apply_filter("filter1", 1.into()).unwrap();

        let sql = c.get_sql_and_params(&SqliteDialect).unwrap();
        assert!(sql.where_clause.sql.starts_with("t.f = :"));
        assert!(sql.having_clause.sql.starts_with("COUNT(gm.id) >= :"));
    }

    #[test]
    fn remove_filter_drops_it() {
        let mut c = collection();
        assert!(c.remove_filter("filter1").is_some());
        assert!(!c.has_filter("filter1"));
        assert!(c.remove_filter("filter1").is_none());
    }

    #[test]
    fn state_round_trip_skips_stale_entries() {
        let mut c = collection();
        c.add_filter(Filter::new("q", "u.lastname").with_handler(TextFilter))
            .unwrap();
        c.apply_filter("q", "smith".into()).unwrap();

        let mut state = c.state();
        state.values.insert("gone".into(), 1.into());

        let mut restored = collection();
        restored
            .add_filter(Filter::new("q", "u.lastname").with_handler(TextFilter))
            .unwrap();
        restored.restore_state(&state);
        assert_eq!(
            restored.get_filter("q").unwrap().raw_value(),
            Some(&JsonValue::from("smith"))
        );
    }

    #[tokio::test]
    async fn cache_round_trip_per_user() {
        let cache = MemoryCache::new(16);
        let mut c = collection();
        c.apply_filter("filter1", 7.into()).unwrap();
        c.cache(&cache).await.unwrap();
        assert_eq!(c.cache_key(), "quarry:filters:3:test");

        let mut fresh = collection();
        assert!(fresh.load_cache(&cache).await.unwrap());
        assert_eq!(fresh.get_filter("filter1").unwrap().raw_value(), Some(&JsonValue::from(7)));

        let mut other_user = FilterCollection::new("test", FilterContext::new(4));
        other_user.add_filter(Filter::new("filter1", "t.f")).unwrap();
        assert!(!other_user.load_cache(&cache).await.unwrap());

        c.delete_cache(&cache).await;
        let mut after = collection();
        assert!(!after.load_cache(&cache).await.unwrap());
    }
}
