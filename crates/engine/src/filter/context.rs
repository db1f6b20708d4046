//! Ambient request context consumed by conditions.

use chrono::{DateTime, Utc};

/// Who is looking at the report, and where.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub user_id: i64,
    /// Course the report is embedded in; None on site-level pages.
    pub course_id: Option<i64>,
    /// Groups the user belongs to.
    pub group_ids: Vec<i64>,
    /// Clock used by date filters.
    pub now: DateTime<Utc>,
    pub is_admin: bool,
    /// Prefix for `{table}` references in handler-issued queries.
    pub table_prefix: String,
}

impl FilterContext {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            course_id: None,
            group_ids: Vec::new(),
            now: Utc::now(),
            is_admin: false,
            table_prefix: String::new(),
        }
    }

    pub fn with_course(mut self, course_id: i64) -> Self {
        self.course_id = Some(course_id);
        self
    }

    pub fn with_groups(mut self, group_ids: Vec<i64>) -> Self {
        self.group_ids = group_ids;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }
}
