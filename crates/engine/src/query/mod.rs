//! Query construction module.
//!
//! This module provides:
//! - QueryBuilder: composable SELECT statements with named placeholders
//! - Predicate, Join, Cte: the pieces a builder is assembled from
//! - count_query / execute_count: COUNT derivation with a request-scoped memo
//! - Dialect: the per-backend rendering seams

mod builder;
mod count;
mod cte;
pub mod dialect;
mod join;
pub mod placeholder;
mod predicate;
pub mod types;

pub use builder::{FromSource, QueryBuilder, UNIQUE_ID, expand_table_refs};
pub use count::{COUNT_COLUMN, CountCache, count_query, execute_count, fallback_count_query};
pub use cte::Cte;
pub use dialect::{Dialect, PostgresDialect, SqliteDialect};
pub use join::Join;
pub use predicate::{Predicate, PredicateRenderer, SubQuery, escape_like_wildcards};
pub use types::{
    Conjunction, JoinType, JsonValue, Operator, Params, SortDirection, merge_params,
};
