//! Common table expressions.
//!
//! CTE names are local to the statement. They are never table-qualified,
//! and `from`/`join` targets naming a registered CTE are emitted bare.

use super::types::Params;

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub sql: String,
    pub params: Params,
}

impl Cte {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            params,
        }
    }

    pub(crate) fn render(&self) -> String {
        format!("{} AS ({})", self.name, self.sql)
    }
}

/// Render the `WITH` prologue, or nothing when there are no CTEs.
pub(crate) fn render_with(ctes: &[Cte]) -> String {
    if ctes.is_empty() {
        return String::new();
    }
    let body: Vec<String> = ctes.iter().map(Cte::render).collect();
    format!("WITH {} ", body.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_prologue() {
        assert_eq!(render_with(&[]), "");
        let ctes = vec![
            Cte::new("counts", "SELECT 1 AS n", Params::new()),
            Cte::new("more", "SELECT 2 AS n", Params::new()),
        ];
        assert_eq!(
            render_with(&ctes),
            "WITH counts AS (SELECT 1 AS n), more AS (SELECT 2 AS n) "
        );
    }
}
