//! Filters and conditions.
//!
//! A `Filter` turns a user-supplied value into a predicate. A condition is a
//! filter whose handler ignores user input and derives its values from the
//! `FilterContext` instead; conditions are always applied.
//!
//! Handlers:
//! - ValueFilter: compares the raw value with the filter's operator
//! - SelectFilter: choice from static or query-loaded options
//! - DateFilter: relative date functions
//! - TextFilter: substring search
//! - conditions: logged-in user, current course, my groups, enrolled courses

mod collection;
mod conditions;
mod context;
mod date;
mod select;
mod text;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

pub use collection::{ClauseSql, FilterCollection, FilterSql, FilterState, filter_cache_key};
pub use conditions::{
    CurrentCourseCondition, EnrolledCoursesCondition, LoggedInUserCondition, MyGroupsCondition,
    NeverTrue,
};
pub use context::FilterContext;
pub use date::{DATE_FUNCTIONS, DateFilter};
pub use select::{ALL, AllPolicy, FilterOption, OptionSource, SelectFilter};
pub use text::TextFilter;

use crate::db::Storage;
use crate::error::EngineResult;
use crate::query::{Conjunction, JsonValue, Operator, Predicate};

/// Which clause a filter's SQL lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterClause {
    #[default]
    Where,
    Having,
}

/// Behaviour behind a filter.
pub trait FilterHandler: Send + Sync + fmt::Debug {
    /// Operator the owning filter should use unless configured otherwise.
    fn default_operator(&self) -> Option<Operator> {
        None
    }

    /// Value in effect before the user picks one.
    fn default_raw_value(&self) -> Option<JsonValue> {
        None
    }

    /// Conditions ignore user input and are always applied.
    fn is_condition(&self) -> bool {
        false
    }

    /// Check and normalize user input.
    fn validate(&self, name: &str, value: JsonValue) -> EngineResult<JsonValue> {
        let _ = name;
        Ok(value)
    }

    /// Build the predicate for the effective value, or None when the
    /// filter contributes no SQL.
    fn build_predicate(
        &self,
        selector: &str,
        operator: &Operator,
        value: Option<&JsonValue>,
        ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>>;

    /// Optional async preparation (e.g. loading options).
    ///
    /// Called once by `FilterCollection::init`. Default implementation is
    /// a no-op.
    fn init<'a>(
        &'a mut self,
        storage: &'a dyn Storage,
        ctx: &'a FilterContext,
    ) -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>> {
        let _ = (storage, ctx);
        Box::pin(async move { Ok(()) })
    }
}

/// Plain comparison against the raw value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueFilter;

impl FilterHandler for ValueFilter {
    fn build_predicate(
        &self,
        selector: &str,
        operator: &Operator,
        value: Option<&JsonValue>,
        _ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        Ok(value.map(|v| {
            Predicate::new(selector, vec![v.clone()], operator.clone(), Conjunction::And)
        }))
    }
}

/// A named filter bound to a select expression.
#[derive(Debug)]
pub struct Filter {
    name: String,
    selector: String,
    label: String,
    operator: Operator,
    required: bool,
    clause: FilterClause,
    raw_value: Option<JsonValue>,
    handler: Box<dyn FilterHandler>,
}

impl Filter {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            selector: selector.into(),
            operator: Operator::Equal,
            required: false,
            clause: FilterClause::Where,
            raw_value: None,
            handler: Box::new(ValueFilter),
        }
    }

    /// Replace the handler, adopting its preferred operator.
    pub fn with_handler(mut self, handler: impl FilterHandler + 'static) -> Self {
        if let Some(op) = handler.default_operator() {
            self.operator = op;
        }
        self.handler = Box::new(handler);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    pub fn with_clause(mut self, clause: FilterClause) -> Self {
        self.clause = clause;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn clause(&self) -> FilterClause {
        self.clause
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_condition(&self) -> bool {
        self.handler.is_condition()
    }

    pub fn handler(&self) -> &dyn FilterHandler {
        self.handler.as_ref()
    }

    pub(crate) fn handler_mut(&mut self) -> &mut dyn FilterHandler {
        self.handler.as_mut()
    }

    pub fn raw_value(&self) -> Option<&JsonValue> {
        self.raw_value.as_ref()
    }

    pub fn default_value(&self) -> Option<JsonValue> {
        self.handler.default_raw_value()
    }

    /// Raw value if set, otherwise the handler's default.
    pub fn effective_value(&self) -> Option<JsonValue> {
        self.raw_value.clone().or_else(|| self.default_value())
    }

    /// Validate and store a user value.
    pub fn set_raw_value(&mut self, value: JsonValue) -> EngineResult<()> {
        let value = self.handler.validate(&self.name, value)?;
        self.raw_value = Some(value);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.raw_value = None;
    }

    /// Applied when a raw value exists and differs from the default.
    /// Conditions are always applied.
    pub fn is_applied(&self) -> bool {
        if self.is_condition() {
            return true;
        }
        match &self.raw_value {
            Some(raw) => Some(raw) != self.default_value().as_ref(),
            None => false,
        }
    }

    /// The predicate for the effective value.
    pub fn predicate(&self, ctx: &FilterContext) -> EngineResult<Option<Predicate>> {
        let value = if self.is_condition() {
            None
        } else {
            self.effective_value()
        };
        self.handler
            .build_predicate(&self.selector, &self.operator, value.as_ref(), ctx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::SqliteDialect;

    fn ctx() -> FilterContext {
        FilterContext::new(2)
    }

    #[test]
    fn unset_filter_is_not_applied_and_renders_nothing() {
        let filter = Filter::new("filter1", "t.f");
        assert!(!filter.is_applied());
        assert!(filter.predicate(&ctx()).unwrap().is_none());
    }

    #[test]
    fn set_value_renders_with_filter_operator() {
        let mut filter = Filter::new("score", "g.finalgrade").with_operator(Operator::GreaterOrEqual);
        filter.set_raw_value(50.into()).unwrap();
        assert!(filter.is_applied());

        let (sql, params) = filter
            .predicate(&ctx())
            .unwrap()
            .unwrap()
            .to_sql(&SqliteDialect)
            .unwrap();
        assert!(sql.starts_with("g.finalgrade >= :"));
        assert_eq!(params.values().next(), Some(&JsonValue::from(50)));
    }

    #[test]
    fn value_equal_to_default_is_not_applied() {
        let mut filter = Filter::new("category", "c.category").with_handler(SelectFilter::new(
            OptionSource::Static(vec![FilterOption::new(1, "Misc"), FilterOption::new(2, "Science")]),
            AllPolicy::Ignore,
        ));
        assert_eq!(filter.default_value(), Some(JsonValue::from(ALL)));
        filter.set_raw_value(ALL.into()).unwrap();
        assert!(!filter.is_applied());
        filter.set_raw_value(2.into()).unwrap();
        assert!(filter.is_applied());
        filter.clear();
        assert!(!filter.is_applied());
    }

    #[test]
    fn handler_operator_is_adopted() {
        let filter = Filter::new("q", "u.firstname").with_handler(TextFilter);
        assert_eq!(filter.operator(), &Operator::LikeWildcard);
    }
}
