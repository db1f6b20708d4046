//! Report sources and their orchestration.
//!
//! A `ReportSource` describes a report: the base query, the fields it can
//! show and the filters it offers. A `DataSource` combines one with a
//! request's preferences, filter values and paging, then runs it.

mod courses;
mod data_source;
mod paginator;
mod preferences;
mod users;

use std::fmt;
use std::sync::Arc;

pub use courses::CoursesSource;
pub use data_source::{DataSource, RowCollection};
pub use paginator::{DEFAULT_PAGE_PARAM, PageInfo, Paginator};
pub use preferences::{FieldPreference, FilterPreference, Layout, Preferences};
pub use users::UsersSource;

use crate::error::EngineResult;
use crate::field::FieldDefinition;
use crate::filter::{FilterCollection, FilterContext};
use crate::query::QueryBuilder;

/// Definition of one report.
pub trait ReportSource: Send + Sync + fmt::Debug {
    /// Stable name, also used as the filter collection identifier.
    fn name(&self) -> &str;

    /// Base query: FROM, joins, CTEs and fixed predicates. Fields and
    /// filters are added on top.
    fn query_template(&self) -> QueryBuilder;

    fn field_definitions(&self) -> EngineResult<Vec<FieldDefinition>>;

    fn filter_collection(&self, context: &FilterContext) -> EngineResult<FilterCollection>;
}

/// Built-in source by name.
pub fn builtin_source(name: &str) -> Option<Arc<dyn ReportSource>> {
    match name {
        "users" => Some(Arc::new(UsersSource)),
        "courses" => Some(Arc::new(CoursesSource)),
        _ => None,
    }
}

/// Names accepted by `builtin_source`.
pub const BUILTIN_SOURCES: &[&str] = &["users", "courses"];
