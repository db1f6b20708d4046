//! Join clauses.

use super::types::{JoinType, Params, merge_params};

/// A join against a physical table or a CTE.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub conditions: Vec<String>,
    pub params: Params,
    pub kind: JoinType,
}

impl Join {
    pub fn new(
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
        kind: JoinType,
    ) -> Self {
        let condition = condition.into();
        let conditions = if condition.trim().is_empty() {
            Vec::new()
        } else {
            vec![condition]
        };
        Self {
            table: table.into(),
            alias: alias.into(),
            conditions,
            params: Params::new(),
            kind,
        }
    }

    /// Add a condition, ANDed with the existing ones.
    pub fn add_condition(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    pub fn add_params(&mut self, params: &Params) {
        merge_params(&mut self.params, params);
    }

    /// Render the clause. `table_ref` is the already-qualified table name.
    pub(crate) fn render(&self, table_ref: &str) -> String {
        let on = if self.conditions.is_empty() {
            "1=1".to_string()
        } else {
            self.conditions.join(" AND ")
        };
        format!("{} {table_ref} {} ON {on}", self.kind.as_sql(), self.alias)
    }
}
