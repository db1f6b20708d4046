//! Engine error types.
//!
//! Errors fall into four groups: configuration mistakes (programmer or
//! report-definition errors, never shown to end users), validation failures
//! raised while rendering predicates, execution failures from the storage
//! backend, and the orchestrator's generic "report unavailable" wrapper.

use thiserror::Error;

use crate::query::Params;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    // -- configuration ----------------------------------------------------
    #[error("field '{0}' has no select expression")]
    MissingSelect(String),

    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    #[error("duplicate filter name: {0}")]
    DuplicateFilter(String),

    #[error("missing join alias: {0}")]
    MissingJoinAlias(String),

    #[error("invalid sort direction: {0}")]
    InvalidSortDirection(String),

    #[error("invalid date function: {0}")]
    InvalidDateFunction(String),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("configuration error: {0}")]
    Config(String),

    // -- validation -------------------------------------------------------
    #[error("empty predicate: operator {operator} on '{selector}' requires at least one value")]
    EmptyPredicate { selector: String, operator: String },

    #[error("unsupported operator '{operator}' for '{selector}'")]
    UnsupportedOperator { selector: String, operator: String },

    #[error("custom operator on '{0}' has no renderer attached")]
    CustomOperatorNotImplemented(String),

    #[error("invalid value for filter '{name}': {reason}")]
    InvalidFilterValue { name: String, reason: String },

    // -- execution --------------------------------------------------------
    #[error("query execution failed: {message}")]
    Execution {
        message: String,
        sql: String,
        params: Params,
    },

    // -- reporting --------------------------------------------------------
    #[error("unable to build report")]
    ReportUnavailable(#[source] Box<EngineError>),

    #[error("cache error: {0}")]
    Cache(String),
}

impl EngineError {
    /// Build an execution error carrying the offending statement.
    pub fn execution(err: impl std::fmt::Display, sql: &str, params: &Params) -> Self {
        EngineError::Execution {
            message: err.to_string(),
            sql: sql.to_string(),
            params: params.clone(),
        }
    }

    /// Whether this is a configuration (programmer) error.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::MissingSelect(_)
                | EngineError::DuplicateField(_)
                | EngineError::DuplicateFilter(_)
                | EngineError::MissingJoinAlias(_)
                | EngineError::InvalidSortDirection(_)
                | EngineError::InvalidDateFunction(_)
                | EngineError::UnknownFilter(_)
                | EngineError::UnknownField(_)
                | EngineError::Config(_)
        )
    }

    /// Whether this error was raised while validating a predicate.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyPredicate { .. }
                | EngineError::UnsupportedOperator { .. }
                | EngineError::CustomOperatorNotImplemented(_)
                | EngineError::InvalidFilterValue { .. }
        )
    }

    /// Message suitable for the presentation layer.
    ///
    /// Administrators see the underlying cause; everyone else gets a
    /// generic notice.
    pub fn user_message(&self, is_admin: bool) -> String {
        let generic = "Unable to load this report right now.".to_string();
        if !is_admin {
            return generic;
        }

        match self {
            EngineError::ReportUnavailable(inner) => format!("{generic} ({inner})"),
            EngineError::Execution { message, sql, .. } => {
                tracing::error!(error = %message, sql = %sql, "report query failed");
                format!("{generic} ({message})")
            }
            other => format!("{generic} ({other})"),
        }
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
