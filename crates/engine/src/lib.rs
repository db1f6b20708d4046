//! Quarry report engine.
//!
//! Builds parameterized SQL for dashboard widgets from composable pieces,
//! turns user input and access rules into predicates, and transforms raw
//! rows into display values.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod field;
pub mod filter;
pub mod query;
pub mod source;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use query::QueryBuilder;
pub use source::{DataSource, Preferences, ReportSource, RowCollection};
