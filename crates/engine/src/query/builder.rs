//! Composable SELECT builder.
//!
//! Collects selects, joins, CTEs, predicates, grouping, ordering and limits,
//! then renders one parameterized statement with named `:param`
//! placeholders. Rendering is pure: the builder is never mutated by
//! `build_sql`, and deriving variants (see `count_query`) works on clones.

use std::sync::LazyLock;

use regex::Regex;

use super::cte::{Cte, render_with};
use super::dialect::Dialect;
use super::join::Join;
use super::predicate::Predicate;
use super::types::{Conjunction, JoinType, JsonValue, Operator, Params, SortDirection, merge_params};
use crate::error::{EngineError, EngineResult};

/// Alias reserved for the row identity column.
pub const UNIQUE_ID: &str = "unique_id";

/// `{name}` table references inside raw SQL fragments.
#[allow(clippy::expect_used)]
static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("TABLE_REF regex is a compile-time constant")
});

/// Expand `{name}` references in a standalone fragment to `<prefix>name`.
/// Quoted strings and identifiers are left alone.
pub fn expand_table_refs(sql: &str, prefix: &str) -> String {
    replace_table_refs(sql, |name| format!("{prefix}{name}"))
}

fn replace_table_refs(sql: &str, table: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(open) = rest.find(['\'', '"']) {
        let quote = rest[open..].chars().next().unwrap_or('\'');
        let (plain, quoted) = rest.split_at(open);
        out.push_str(&expand_plain(plain, &table));

        // An unterminated quote runs to the end.
        let close = quoted[1..].find(quote).map_or(quoted.len(), |i| i + 2);
        out.push_str(&quoted[..close]);
        rest = &quoted[close..];
    }
    out.push_str(&expand_plain(rest, &table));
    out
}

fn expand_plain(sql: &str, table: &impl Fn(&str) -> String) -> String {
    TABLE_REF
        .replace_all(sql, |caps: &regex::Captures<'_>| table(&caps[1]))
        .into_owned()
}

/// What the statement selects from.
#[derive(Debug, Clone)]
pub enum FromSource {
    /// Physical table (prefixed) or CTE (bare).
    Table { table: String, alias: String },
    /// Derived table.
    Subquery {
        query: Box<QueryBuilder>,
        alias: String,
    },
}

impl FromSource {
    pub fn alias(&self) -> &str {
        match self {
            FromSource::Table { alias, .. } | FromSource::Subquery { alias, .. } => alias,
        }
    }
}

/// SELECT statement under construction.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub(super) from: Option<FromSource>,
    /// alias -> expression, in insertion order.
    pub(super) selects: Vec<(String, String)>,
    pub(super) joins: Vec<Join>,
    pub(super) ctes: Vec<Cte>,
    pub(super) predicates: Vec<Predicate>,
    pub(super) raw_where: Vec<(String, Params)>,
    pub(super) raw_having: Vec<(String, Params)>,
    pub(super) group_by: Vec<String>,
    pub(super) order_by: Vec<(String, SortDirection)>,
    pub(super) limit_from: u64,
    /// Zero means no limit.
    pub(super) limit_num: u64,
    pub(super) distinct: bool,
    pub(super) table_prefix: String,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            from: None,
            selects: Vec::new(),
            joins: Vec::new(),
            ctes: Vec::new(),
            predicates: Vec::new(),
            raw_where: Vec::new(),
            raw_having: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit_from: 0,
            limit_num: 0,
            distinct: true,
            table_prefix: String::new(),
        }
    }

    /// Builder whose physical tables are qualified with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let mut builder = Self::new();
        builder.table_prefix = prefix.into();
        builder
    }

    pub fn set_table_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.table_prefix = prefix.into();
        self
    }

    // -- construction ------------------------------------------------------

    /// Add a select expression. Re-using an alias replaces its expression
    /// in place.
    pub fn select(&mut self, expr: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        let expr = expr.into();
        let mut alias = alias.into();
        if alias.is_empty() {
            alias.clone_from(&expr);
        }
        match self.selects.iter_mut().find(|(a, _)| *a == alias) {
            Some(existing) => existing.1 = expr,
            None => self.selects.push((alias, expr)),
        }
        self
    }

    pub fn remove_select(&mut self, alias: &str) -> &mut Self {
        self.selects.retain(|(a, _)| a != alias);
        self
    }

    pub fn from(&mut self, table: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        self.from = Some(FromSource::Table {
            table: table.into(),
            alias: alias.into(),
        });
        self
    }

    /// Select from a derived table.
    pub fn from_subquery(&mut self, query: QueryBuilder, alias: impl Into<String>) -> &mut Self {
        self.from = Some(FromSource::Subquery {
            query: Box::new(query),
            alias: alias.into(),
        });
        self
    }

    /// Add a join. A join re-using an alias replaces the earlier one.
    pub fn join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        condition: impl Into<String>,
        kind: JoinType,
    ) -> &mut Self {
        let join = Join::new(table, alias, condition, kind);
        match self.joins.iter_mut().find(|j| j.alias == join.alias) {
            Some(existing) => *existing = join,
            None => self.joins.push(join),
        }
        self
    }

    /// AND an extra condition onto an existing join.
    pub fn join_condition(
        &mut self,
        alias: &str,
        condition: impl Into<String>,
    ) -> EngineResult<&mut Self> {
        self.join_mut(alias)?.add_condition(condition);
        Ok(self)
    }

    /// Bind parameters used by a join's conditions.
    pub fn join_params(&mut self, alias: &str, params: &Params) -> EngineResult<&mut Self> {
        self.join_mut(alias)?.add_params(params);
        Ok(self)
    }

    fn join_mut(&mut self, alias: &str) -> EngineResult<&mut Join> {
        self.joins
            .iter_mut()
            .find(|j| j.alias == alias)
            .ok_or_else(|| EngineError::MissingJoinAlias(alias.to_string()))
    }

    /// Add a predicate and return it for further refinement.
    pub fn where_(
        &mut self,
        selector: impl Into<String>,
        values: Vec<JsonValue>,
        operator: Operator,
        conjunction: Conjunction,
    ) -> &mut Predicate {
        let index = self.predicates.len();
        self.predicates
            .push(Predicate::new(selector, values, operator, conjunction));
        &mut self.predicates[index]
    }

    /// `selector IN (sql)`.
    pub fn where_in_query(
        &mut self,
        selector: impl Into<String>,
        sql: impl Into<String>,
        params: Params,
    ) -> &mut Predicate {
        let predicate = self.where_(selector, Vec::new(), Operator::InQuery, Conjunction::And);
        predicate.set_subquery(sql, params);
        predicate
    }

    /// Raw WHERE fragment, ANDed after the predicate group.
    pub fn where_raw(&mut self, sql: impl Into<String>, params: Params) -> &mut Self {
        self.raw_where.push((sql.into(), params));
        self
    }

    pub fn having_raw(&mut self, sql: impl Into<String>, params: Params) -> &mut Self {
        self.raw_having.push((sql.into(), params));
        self
    }

    /// Order by `expr`. `direction` must be `asc` or `desc` (any case).
    pub fn orderby(&mut self, expr: impl Into<String>, direction: &str) -> EngineResult<&mut Self> {
        let direction = direction.parse::<SortDirection>()?;
        Ok(self.orderby_direction(expr, direction))
    }

    pub fn orderby_direction(
        &mut self,
        expr: impl Into<String>,
        direction: SortDirection,
    ) -> &mut Self {
        let expr = expr.into();
        match self.order_by.iter_mut().find(|(e, _)| *e == expr) {
            Some(existing) => existing.1 = direction,
            None => self.order_by.push((expr, direction)),
        }
        self
    }

    pub fn groupby(&mut self, expr: impl Into<String>) -> &mut Self {
        let expr = expr.into();
        if !self.group_by.contains(&expr) {
            self.group_by.push(expr);
        }
        self
    }

    pub fn limitfrom(&mut self, offset: u64) -> &mut Self {
        self.limit_from = offset;
        self
    }

    /// Row limit; zero removes it.
    pub fn limitnum(&mut self, limit: u64) -> &mut Self {
        self.limit_num = limit;
        self
    }

    /// Register a CTE. Re-using a name replaces the body.
    pub fn set_cte(
        &mut self,
        name: impl Into<String>,
        sql: impl Into<String>,
        params: Params,
    ) -> &mut Self {
        let cte = Cte::new(name, sql, params);
        match self.ctes.iter_mut().find(|c| c.name == cte.name) {
            Some(existing) => *existing = cte,
            None => self.ctes.push(cte),
        }
        self
    }

    pub fn set_distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    // -- inspection --------------------------------------------------------

    pub fn from_source(&self) -> Option<&FromSource> {
        self.from.as_ref()
    }

    /// Alias of the FROM table.
    pub fn alias(&self) -> Option<&str> {
        self.from.as_ref().map(FromSource::alias)
    }

    pub fn selects(&self) -> &[(String, String)] {
        &self.selects
    }

    pub fn get_select(&self, alias: &str) -> Option<&str> {
        self.selects
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, e)| e.as_str())
    }

    pub fn has_select(&self, alias: &str) -> bool {
        self.get_select(alias).is_some()
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn has_join(&self, alias: &str) -> bool {
        self.joins.iter().any(|j| j.alias == alias)
    }

    pub fn ctes(&self) -> &[Cte] {
        &self.ctes
    }

    pub fn has_ctes(&self) -> bool {
        !self.ctes.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn order_by(&self) -> &[(String, SortDirection)] {
        &self.order_by
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    pub fn limit_from(&self) -> u64 {
        self.limit_from
    }

    pub fn limit_num(&self) -> u64 {
        self.limit_num
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    fn is_cte(&self, name: &str) -> bool {
        self.ctes.iter().any(|c| c.name == name)
    }

    fn is_single_count(&self) -> bool {
        match self.selects.as_slice() {
            [(_, expr)] => expr.trim_start().to_ascii_uppercase().starts_with("COUNT("),
            _ => false,
        }
    }

    /// Whether `build_sql` will emit `SELECT DISTINCT`.
    pub fn emits_distinct(&self) -> bool {
        self.distinct && !self.has_select(UNIQUE_ID) && !self.is_single_count()
    }

    // -- rendering ---------------------------------------------------------

    fn table_ref(&self, table: &str) -> String {
        if self.is_cte(table) {
            table.to_string()
        } else {
            format!("{}{table}", self.table_prefix)
        }
    }

    /// Expand `{name}` references to prefixed table names (CTE names stay bare).
    pub fn expand_table_refs(&self, sql: &str) -> String {
        replace_table_refs(sql, |name| self.table_ref(name))
    }

    /// The select list, `unique_id` first.
    pub fn build_select(&self) -> String {
        if self.selects.is_empty() {
            return "*".to_string();
        }

        let column = |alias: &str, expr: &str| {
            if alias == expr {
                expr.to_string()
            } else {
                format!("{expr} AS {alias}")
            }
        };

        let mut columns = Vec::with_capacity(self.selects.len());
        if let Some(expr) = self.get_select(UNIQUE_ID) {
            columns.push(column(UNIQUE_ID, expr));
        }
        columns.extend(
            self.selects
                .iter()
                .filter(|(alias, _)| alias != UNIQUE_ID)
                .map(|(alias, expr)| column(alias, expr)),
        );
        columns.join(", ")
    }

    /// The WHERE body: predicates combined in order by their conjunctions
    /// (parenthesized when any OR is present), then raw fragments ANDed.
    fn build_where(&self, dialect: &dyn Dialect) -> EngineResult<Option<(String, Params)>> {
        let mut params = Params::new();
        let mut group = String::new();
        let mut has_or = false;

        for (i, predicate) in self.predicates.iter().enumerate() {
            let (sql, predicate_params) = predicate.to_sql(dialect)?;
            merge_params(&mut params, &predicate_params);
            if i == 0 {
                group = sql;
            } else {
                has_or |= predicate.conjunction() == Conjunction::Or;
                group = format!("{group} {} {sql}", predicate.conjunction().as_sql());
            }
        }

        let mut parts = Vec::new();
        if !group.is_empty() {
            parts.push(if has_or { format!("({group})") } else { group });
        }
        for (raw, raw_params) in &self.raw_where {
            parts.push(format!("({raw})"));
            merge_params(&mut params, raw_params);
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some((parts.join(" AND "), params)))
    }

    /// Render the statement and collect its named parameters.
    pub fn build_sql(&self, dialect: &dyn Dialect) -> EngineResult<(String, Params)> {
        let mut params = Params::new();
        for cte in &self.ctes {
            merge_params(&mut params, &cte.params);
        }

        let mut sql = render_with(&self.ctes);
        sql.push_str("SELECT ");
        if self.emits_distinct() {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.build_select());

        match &self.from {
            None => {
                return Err(EngineError::Config(
                    "query has no FROM table".to_string(),
                ));
            }
            Some(FromSource::Table { table, alias }) => {
                sql.push_str(&format!(" FROM {} {alias}", self.table_ref(table)));
            }
            Some(FromSource::Subquery { query, alias }) => {
                let (inner, inner_params) = query.build_sql(dialect)?;
                merge_params(&mut params, &inner_params);
                sql.push_str(&format!(" FROM ({inner}) {alias}"));
            }
        }

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.render(&self.table_ref(&join.table)));
            merge_params(&mut params, &join.params);
        }

        if let Some((where_sql, where_params)) = self.build_where(dialect)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            merge_params(&mut params, &where_params);
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.raw_having.is_empty() {
            let having: Vec<String> = self
                .raw_having
                .iter()
                .map(|(raw, raw_params)| {
                    merge_params(&mut params, raw_params);
                    format!("({raw})")
                })
                .collect();
            sql.push_str(" HAVING ");
            sql.push_str(&having.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|(expr, dir)| format!("{expr} {}", dir.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        let limit = (self.limit_num > 0).then_some(self.limit_num);
        let tail = dialect.limit_offset(limit, self.limit_from);
        if !tail.is_empty() {
            sql.push(' ');
            sql.push_str(&tail);
        }

        Ok((self.expand_table_refs(&sql), params))
    }
}
