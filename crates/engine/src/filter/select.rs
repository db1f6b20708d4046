//! Choice filter.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::conditions::never_true;
use super::{FilterContext, FilterHandler};
use crate::db::Storage;
use crate::error::{EngineError, EngineResult};
use crate::query::{Conjunction, JsonValue, Operator, Params, Predicate, expand_table_refs};

/// Sentinel value meaning "every option".
pub const ALL: &str = "all";

/// One selectable option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    pub value: JsonValue,
    pub label: String,
}

impl FilterOption {
    pub fn new(value: impl Into<JsonValue>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Where options come from.
#[derive(Debug, Clone)]
pub enum OptionSource {
    Static(Vec<FilterOption>),
    /// First column is the value, second (if any) the label. `{table}`
    /// references are prefixed from the context.
    Query { sql: String, params: Params },
}

/// What selecting `ALL` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllPolicy {
    /// No SQL: every row passes.
    #[default]
    Ignore,
    /// `IN (every option value)`: rows outside the option set are excluded.
    ExpandOptions,
}

#[derive(Debug, Clone)]
pub struct SelectFilter {
    source: OptionSource,
    options: Vec<FilterOption>,
    all_policy: AllPolicy,
    multiple: bool,
}

impl SelectFilter {
    pub fn new(source: OptionSource, all_policy: AllPolicy) -> Self {
        let options = match &source {
            OptionSource::Static(options) => options.clone(),
            OptionSource::Query { .. } => Vec::new(),
        };
        Self {
            source,
            options,
            all_policy,
            multiple: false,
        }
    }

    /// Accept a list of values.
    pub fn multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    pub fn options(&self) -> &[FilterOption] {
        &self.options
    }

    pub fn all_policy(&self) -> AllPolicy {
        self.all_policy
    }

    /// Canonical option value matching `value` (compared as text, so `"3"`
    /// selects option `3`).
    fn find_option(&self, value: &JsonValue) -> Option<&JsonValue> {
        let wanted = as_text(value);
        self.options
            .iter()
            .map(|o| &o.value)
            .find(|v| as_text(v) == wanted)
    }

    fn option_values(&self) -> Vec<JsonValue> {
        self.options.iter().map(|o| o.value.clone()).collect()
    }
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_all(value: &JsonValue) -> bool {
    value.as_str().is_some_and(|s| s.eq_ignore_ascii_case(ALL))
}

impl FilterHandler for SelectFilter {
    /// More than one option defaults to `ALL`; exactly one defaults to it.
    fn default_raw_value(&self) -> Option<JsonValue> {
        match self.options.as_slice() {
            [] => None,
            [only] => Some(only.value.clone()),
            _ => Some(JsonValue::from(ALL)),
        }
    }

    fn validate(&self, name: &str, value: JsonValue) -> EngineResult<JsonValue> {
        if is_all(&value) {
            return Ok(JsonValue::from(ALL));
        }

        let invalid = |reason: String| EngineError::InvalidFilterValue {
            name: name.to_string(),
            reason,
        };

        // Options not loaded yet: accept as given.
        if self.options.is_empty() {
            return Ok(value);
        }

        match value {
            JsonValue::Array(items) => {
                if !self.multiple {
                    return Err(invalid("multiple values not allowed".to_string()));
                }
                let mut canonical = Vec::with_capacity(items.len());
                for item in &items {
                    let option = self
                        .find_option(item)
                        .ok_or_else(|| invalid(format!("'{}' is not an option", as_text(item))))?;
                    canonical.push(option.clone());
                }
                Ok(JsonValue::Array(canonical))
            }
            single => self
                .find_option(&single)
                .cloned()
                .ok_or_else(|| invalid(format!("'{}' is not an option", as_text(&single)))),
        }
    }

    fn build_predicate(
        &self,
        selector: &str,
        operator: &Operator,
        value: Option<&JsonValue>,
        _ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        let Some(value) = value else {
            return Ok(None);
        };

        if is_all(value) {
            return Ok(match self.all_policy {
                AllPolicy::Ignore => None,
                AllPolicy::ExpandOptions if self.options.is_empty() => Some(never_true(selector)),
                AllPolicy::ExpandOptions => Some(Predicate::new(
                    selector,
                    self.option_values(),
                    Operator::In,
                    Conjunction::And,
                )),
            });
        }

        Ok(Some(match value {
            JsonValue::Array(items) => {
                Predicate::new(selector, items.clone(), Operator::In, Conjunction::And)
            }
            single => Predicate::new(
                selector,
                vec![single.clone()],
                operator.clone(),
                Conjunction::And,
            ),
        }))
    }

    fn init<'a>(
        &'a mut self,
        storage: &'a dyn Storage,
        ctx: &'a FilterContext,
    ) -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let OptionSource::Query { sql, params } = &self.source else {
                return Ok(());
            };
            let sql = expand_table_refs(sql, &ctx.table_prefix);
            let rows = storage.fetch_all(&sql, params).await?;

            self.options = rows
                .into_iter()
                .filter_map(|row| {
                    let mut cells = row.into_iter().map(|(_, v)| v);
                    let value = cells.next()?;
                    let label = cells.next().map_or_else(|| as_text(&value), |l| as_text(&l));
                    Some(FilterOption { value, label })
                })
                .collect();

            tracing::debug!(options = self.options.len(), "loaded filter options");
            Ok(())
        })
    }
}
