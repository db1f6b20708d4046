//! Report orchestration: one request's query, rows and page.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use super::paginator::{DEFAULT_PAGE_PARAM, PageInfo, Paginator};
use super::preferences::{Layout, Preferences};
use super::ReportSource;
use crate::config::EngineConfig;
use crate::db::{Row, Storage};
use crate::error::{EngineError, EngineResult};
use crate::field::{FieldDefinition, parse_ids};
use crate::filter::{FilterCollection, FilterContext};
use crate::query::{
    CountCache, Dialect, JsonValue, QueryBuilder, SortDirection, UNIQUE_ID, execute_count,
};

/// Transformed rows plus paging, when the layout pages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowCollection {
    pub rows: Vec<Row>,
    pub page: Option<PageInfo>,
}

impl RowCollection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds, runs and transforms one report for one request.
///
/// The query is assembled once and memoized; changing filters through
/// `apply_filter` or `filters_mut` discards it. COUNT results are memoized
/// for the lifetime of the instance.
pub struct DataSource {
    source: Arc<dyn ReportSource>,
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    preferences: Option<Preferences>,
    layout: Option<Layout>,
    page: u32,
    sort: Option<(String, SortDirection)>,
    fields: Vec<FieldDefinition>,
    filters: FilterCollection,
    query: OnceLock<QueryBuilder>,
    count_cache: CountCache,
}

impl DataSource {
    pub fn new(
        source: Arc<dyn ReportSource>,
        storage: Arc<dyn Storage>,
        context: FilterContext,
    ) -> EngineResult<Self> {
        let config = EngineConfig::default();
        let context = context.with_table_prefix(config.table_prefix.clone());
        let mut fields = source.field_definitions()?;
        for field in &mut fields {
            field.set_table_prefix(&config.table_prefix);
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name()) {
                return Err(EngineError::DuplicateField(field.name().to_string()));
            }
        }
        let filters = source.filter_collection(&context)?;

        Ok(Self {
            source,
            storage,
            config,
            preferences: None,
            layout: None,
            page: 1,
            sort: None,
            fields,
            filters,
            query: OnceLock::new(),
            count_cache: CountCache::new(),
        })
    }

    /// Apply preferences. Filters the preferences disable are removed.
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        let disabled: Vec<String> = self
            .filters
            .filters()
            .iter()
            .filter(|f| !preferences.is_filter_enabled(f))
            .map(|f| f.name().to_string())
            .collect();
        for name in disabled {
            self.filters.remove_filter(&name);
        }
        self.preferences = Some(preferences);
        self.query = OnceLock::new();
        self
    }

    /// Override the layout from preferences.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self.query = OnceLock::new();
        self
    }

    /// Requested page, 1-indexed.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self.query = OnceLock::new();
        self
    }

    /// Requested sort; wins over the preferences' default sort.
    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some((field.into(), direction));
        self.query = OnceLock::new();
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        let context = self
            .filters
            .context()
            .clone()
            .with_table_prefix(config.table_prefix.clone());
        self.filters.set_context(context);
        for field in &mut self.fields {
            field.set_table_prefix(&config.table_prefix);
        }
        self.config = config;
        self.query = OnceLock::new();
        self
    }

    pub fn source(&self) -> &dyn ReportSource {
        self.source.as_ref()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.storage.dialect()
    }

    pub fn preferences(&self) -> Option<&Preferences> {
        self.preferences.as_ref()
    }

    pub fn layout(&self) -> Layout {
        self.layout
            .or_else(|| self.preferences.as_ref().map(|p| p.layout))
            .unwrap_or_default()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> EngineResult<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| EngineError::UnknownField(name.to_string()))
    }

    pub fn filters(&self) -> &FilterCollection {
        &self.filters
    }

    /// Mutable filters. Discards the memoized query.
    pub fn filters_mut(&mut self) -> &mut FilterCollection {
        self.query = OnceLock::new();
        &mut self.filters
    }

    /// Apply a user filter value. Discards the memoized query.
    pub fn apply_filter(&mut self, name: &str, value: JsonValue) -> EngineResult<bool> {
        self.filters_mut().apply_filter(name, value)
    }

    /// Load filter options.
    pub async fn init(&mut self) -> EngineResult<()> {
        self.filters.init(self.storage.as_ref()).await
    }

    /// Rows per page after capping.
    pub fn per_page(&self) -> u32 {
        let requested = self
            .preferences
            .as_ref()
            .and_then(|p| p.per_page)
            .unwrap_or(self.config.default_per_page);
        self.config.clamp_per_page(requested)
    }

    /// Visible fields in display order, identifiers first.
    pub fn display_fields(&self) -> Vec<&FieldDefinition> {
        let Some(prefs) = &self.preferences else {
            let mut visible: Vec<&FieldDefinition> =
                self.fields.iter().filter(|f| f.is_visible()).collect();
            visible.sort_by_key(|f| !f.is_identifier());
            return visible;
        };
        let mut visible: Vec<&FieldDefinition> = self
            .fields
            .iter()
            .filter(|f| prefs.is_field_visible(f))
            .collect();
        visible.sort_by_key(|f| (!f.is_identifier(), prefs.field_order(f.name())));
        visible
    }

    /// The report query, built on first use.
    pub fn get_query(&self) -> EngineResult<&QueryBuilder> {
        if let Some(query) = self.query.get() {
            return Ok(query);
        }
        let built = self.build_query().map_err(report_unavailable)?;
        Ok(self.query.get_or_init(|| built))
    }

    fn build_query(&self) -> EngineResult<QueryBuilder> {
        let dialect = self.storage.dialect();
        let mut qb = self.source.query_template();
        qb.set_table_prefix(self.config.table_prefix.clone());

        let filter_sql = self.filters.get_sql_and_params(dialect)?;
        if !filter_sql.where_clause.is_trivial() {
            qb.where_raw(filter_sql.where_clause.sql, filter_sql.where_clause.params);
        }
        if !filter_sql.having_clause.is_trivial() {
            qb.having_raw(filter_sql.having_clause.sql, filter_sql.having_clause.params);
        }

        let identifiers: Vec<&FieldDefinition> =
            self.fields.iter().filter(|f| f.is_identifier()).collect();
        let mut identifier_exprs = Vec::with_capacity(identifiers.len());
        for field in &identifiers {
            let expr = field
                .select()
                .ok_or_else(|| EngineError::MissingSelect(field.name().to_string()))?;
            identifier_exprs.push(expr.to_string());
        }
        match identifier_exprs.as_slice() {
            [] => {}
            [single] => {
                qb.select(single.as_str(), UNIQUE_ID);
            }
            many => {
                let delimiter = dialect.quote_string(&self.config.unique_id_delimiter);
                let mut parts = Vec::with_capacity(many.len() * 2);
                for (i, expr) in many.iter().enumerate() {
                    if i > 0 {
                        parts.push(delimiter.clone());
                    }
                    parts.push(format!("COALESCE({}, '')", dialect.cast_to_text(expr)));
                }
                qb.select(dialect.concat(&parts), UNIQUE_ID);
            }
        }
        for (field, expr) in identifiers.iter().zip(&identifier_exprs) {
            qb.select(expr.as_str(), field.name());
        }

        let display = self.display_fields();
        for field in &display {
            if let Some(select) = field.select() {
                qb.select(select, field.name());
            }
        }

        if let Some((expr, direction)) = self.resolve_sort(&display) {
            qb.orderby_direction(expr, direction);
        }

        if self.layout().supports_pagination() {
            let per_page = u64::from(self.per_page());
            qb.limitfrom(u64::from(self.page - 1) * per_page)
                .limitnum(per_page);
        }

        qb.build_sql(dialect)?;
        tracing::debug!(source = %self.source.name(), "report query assembled");
        Ok(qb)
    }

    /// Requested sort if usable, else the default sort.
    fn resolve_sort(&self, display: &[&FieldDefinition]) -> Option<(String, SortDirection)> {
        let sortable = |name: &str| {
            display
                .iter()
                .find(|f| f.name() == name && f.is_sortable())
                .and_then(|f| f.sort_expression())
                .map(str::to_string)
        };

        if let Some((name, direction)) = &self.sort {
            match sortable(name) {
                Some(expr) => return Some((expr, *direction)),
                None => tracing::warn!(field = %name, "ignoring sort on unsortable field"),
            }
        }

        let prefs = self.preferences.as_ref()?;
        let name = prefs.default_sort.as_deref()?;
        sortable(name).map(|expr| (expr, prefs.default_sort_direction))
    }

    /// Row count of the report, ignoring paging.
    pub async fn count(&self, unique: bool) -> EngineResult<u64> {
        let query = self.get_query()?;
        execute_count(self.storage.as_ref(), query, unique, &self.count_cache).await
    }

    pub fn get_paginator(&self) -> Paginator {
        Paginator::new(self.per_page(), DEFAULT_PAGE_PARAM)
    }

    /// Paging for the requested page, clamped to the last page.
    pub async fn page_info(&self) -> EngineResult<PageInfo> {
        self.get_paginator()
            .paginate(self.page, || self.count(true))
            .await
    }

    /// Run the report.
    ///
    /// Without preferences nothing is queried and the collection is empty.
    /// Execution errors propagate as-is and no partial rows are returned.
    pub async fn get_data(&mut self) -> EngineResult<RowCollection> {
        if self.preferences.is_none() {
            tracing::debug!(source = %self.source.name(), "report not configured, skipping query");
            return Ok(RowCollection::empty());
        }
        self.init().await?;

        let page = if self.layout().supports_pagination() {
            Some(self.page_info().await?)
        } else {
            None
        };

        let mut query = self.get_query()?.clone();
        if let Some(info) = &page {
            query.limitfrom(info.offset);
        }
        let (sql, params) = query
            .build_sql(self.storage.dialect())
            .map_err(report_unavailable)?;
        let raw_rows = self.storage.fetch_all(&sql, &params).await?;

        let display = self.display_fields();
        self.prefetch_lookups(&display, &raw_rows).await?;

        let rows = raw_rows
            .iter()
            .map(|raw| {
                display
                    .iter()
                    .map(|field| {
                        let value = raw.get(field.name()).cloned().unwrap_or(JsonValue::Null);
                        (field.name().to_string(), field.transform_data(value, raw))
                    })
                    .collect::<Row>()
            })
            .collect::<Vec<_>>();

        tracing::info!(
            source = %self.source.name(),
            rows = rows.len(),
            page = page.as_ref().map(|p| p.page),
            "report executed"
        );
        Ok(RowCollection { rows, page })
    }

    /// Load every label the page's linked-data attributes will read.
    async fn prefetch_lookups(&self, display: &[&FieldDefinition], rows: &[Row]) -> EngineResult<()> {
        for field in display {
            for attribute in field.attributes() {
                let Some((spec, cache)) = attribute.lookup() else {
                    continue;
                };
                let ids: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|row| row.get(field.name()))
                    .flat_map(parse_ids)
                    .collect();
                if ids.is_empty() {
                    continue;
                }
                cache
                    .prefetch(self.storage.as_ref(), spec, &ids)
                    .await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("source", &self.source.name())
            .field("layout", &self.layout())
            .field("page", &self.page)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

fn report_unavailable(err: EngineError) -> EngineError {
    match err {
        EngineError::ReportUnavailable(_) => err,
        other => {
            tracing::warn!(error = %other, "report query could not be built");
            EngineError::ReportUnavailable(Box::new(other))
        }
    }
}
