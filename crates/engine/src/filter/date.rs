//! Relative date filter.
//!
//! The user picks one of a fixed set of date functions; each resolves to a
//! Unix timestamp bound relative to the context clock.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use super::{FilterContext, FilterHandler};
use crate::error::{EngineError, EngineResult};
use crate::query::{Conjunction, JsonValue, Operator, Predicate};

/// Every date function the filter understands.
pub const DATE_FUNCTIONS: &[&str] = &[
    "today",
    "last_7_days",
    "last_30_days",
    "this_month",
    "this_year",
    "before_today",
];

#[derive(Debug, Clone)]
pub struct DateFilter {
    functions: Vec<String>,
}

impl DateFilter {
    /// Offer `functions`. Unknown names fail with `InvalidDateFunction`.
    pub fn new(functions: &[&str]) -> EngineResult<Self> {
        for f in functions {
            if !DATE_FUNCTIONS.contains(f) {
                return Err(EngineError::InvalidDateFunction((*f).to_string()));
            }
        }
        Ok(Self {
            functions: functions.iter().map(|f| (*f).to_string()).collect(),
        })
    }

    /// Offer every known function.
    pub fn all() -> Self {
        Self {
            functions: DATE_FUNCTIONS.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    pub fn functions(&self) -> &[String] {
        &self.functions
    }
}

fn start_of_day(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
        .unwrap_or_default()
}

/// Resolve a date function to `(operator, timestamp)`.
pub(crate) fn resolve(function: &str, now: DateTime<Utc>) -> Option<(Operator, i64)> {
    let today = now.date_naive();
    let bound = match function {
        "today" => (Operator::GreaterOrEqual, start_of_day(today)),
        "last_7_days" => (Operator::GreaterOrEqual, (now - Duration::days(7)).timestamp()),
        "last_30_days" => (Operator::GreaterOrEqual, (now - Duration::days(30)).timestamp()),
        "this_month" => (
            Operator::GreaterOrEqual,
            start_of_day(today.with_day(1).unwrap_or(today)),
        ),
        "this_year" => (
            Operator::GreaterOrEqual,
            start_of_day(today.with_ordinal(1).unwrap_or(today)),
        ),
        "before_today" => (Operator::LessThan, start_of_day(today)),
        _ => return None,
    };
    Some(bound)
}

impl FilterHandler for DateFilter {
    fn validate(&self, name: &str, value: JsonValue) -> EngineResult<JsonValue> {
        match value.as_str() {
            Some(f) if self.functions.iter().any(|known| known == f) => Ok(value),
            _ => Err(EngineError::InvalidFilterValue {
                name: name.to_string(),
                reason: format!("unknown date function {value}"),
            }),
        }
    }

    fn build_predicate(
        &self,
        selector: &str,
        _operator: &Operator,
        value: Option<&JsonValue>,
        ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        let Some(function) = value.and_then(JsonValue::as_str) else {
            return Ok(None);
        };
        let (operator, timestamp) = resolve(function, ctx.now)
            .ok_or_else(|| EngineError::InvalidDateFunction(function.to_string()))?;
        Ok(Some(Predicate::new(
            selector,
            vec![timestamp.into()],
            operator,
            Conjunction::And,
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::SqliteDialect;

    fn noon_march_15() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn unknown_function_fails_at_construction() {
        let err = DateFilter::new(&["today", "next_tuesday"]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateFunction(f) if f == "next_tuesday"));
    }

    #[test]
    fn resolves_relative_to_clock() {
        let now = noon_march_15();
        let day = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap().timestamp();

        assert_eq!(resolve("today", now), Some((Operator::GreaterOrEqual, day)));
        assert_eq!(resolve("before_today", now), Some((Operator::LessThan, day)));
        assert_eq!(
            resolve("last_7_days", now),
            Some((Operator::GreaterOrEqual, now.timestamp() - 7 * 86_400))
        );
        assert_eq!(
            resolve("this_month", now),
            Some((
                Operator::GreaterOrEqual,
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().timestamp()
            ))
        );
        assert_eq!(
            resolve("this_year", now),
            Some((
                Operator::GreaterOrEqual,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp()
            ))
        );
        assert_eq!(resolve("someday", now), None);
    }

    #[test]
    fn renders_timestamp_comparison() {
        let filter = DateFilter::new(&["before_today"]).unwrap();
        let ctx = FilterContext::new(1).with_now(noon_march_15());
        let value = filter.validate("added", "before_today".into()).unwrap();
        let (sql, params) = filter
            .build_predicate("c.timecreated", &Operator::Equal, Some(&value), &ctx)
            .unwrap()
            .unwrap()
            .to_sql(&SqliteDialect)
            .unwrap();
        assert!(sql.starts_with("c.timecreated < :"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn rejects_functions_not_offered() {
        let filter = DateFilter::new(&["today"]).unwrap();
        assert!(filter.validate("added", "this_year".into()).is_err());
        assert!(filter.validate("added", 5.into()).is_err());
    }
}
