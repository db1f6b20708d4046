//! Conditions: always-applied filters driven by the request context.

use std::sync::Arc;

use super::{FilterContext, FilterHandler};
use crate::error::EngineResult;
use crate::query::placeholder::next_param_name;
use crate::query::{
    Conjunction, Dialect, JsonValue, Operator, Params, Predicate, PredicateRenderer,
};

/// Renders `1 = 0`, for conditions that must exclude every row.
#[derive(Debug, Clone, Copy)]
pub struct NeverTrue;

impl PredicateRenderer for NeverTrue {
    fn render(&self, _predicate: &Predicate, _dialect: &dyn Dialect) -> EngineResult<(String, Params)> {
        Ok(("1 = 0".to_string(), Params::new()))
    }
}

pub(crate) fn never_true(selector: &str) -> Predicate {
    let mut predicate = Predicate::new(selector, Vec::new(), Operator::Custom, Conjunction::And);
    predicate.set_renderer(Arc::new(NeverTrue));
    predicate
}

/// Rows owned by the current user.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggedInUserCondition;

impl FilterHandler for LoggedInUserCondition {
    fn is_condition(&self) -> bool {
        true
    }

    fn build_predicate(
        &self,
        selector: &str,
        _operator: &Operator,
        _value: Option<&JsonValue>,
        ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        Ok(Some(Predicate::new(
            selector,
            vec![ctx.user_id.into()],
            Operator::Equal,
            Conjunction::And,
        )))
    }
}

/// Rows of the course the report is shown in. Outside a course nothing
/// matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentCourseCondition;

impl FilterHandler for CurrentCourseCondition {
    fn is_condition(&self) -> bool {
        true
    }

    fn build_predicate(
        &self,
        selector: &str,
        _operator: &Operator,
        _value: Option<&JsonValue>,
        ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        Ok(Some(match ctx.course_id {
            Some(course_id) => {
                Predicate::new(selector, vec![course_id.into()], Operator::Equal, Conjunction::And)
            }
            None => never_true(selector),
        }))
    }
}

/// Rows in any group the user belongs to. A user without groups sees
/// nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MyGroupsCondition;

impl FilterHandler for MyGroupsCondition {
    fn is_condition(&self) -> bool {
        true
    }

    fn build_predicate(
        &self,
        selector: &str,
        _operator: &Operator,
        _value: Option<&JsonValue>,
        ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        if ctx.group_ids.is_empty() {
            return Ok(Some(never_true(selector)));
        }
        let values = ctx.group_ids.iter().map(|id| JsonValue::from(*id)).collect();
        Ok(Some(Predicate::new(selector, values, Operator::In, Conjunction::And)))
    }
}

/// Courses the user is enrolled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrolledCoursesCondition;

impl FilterHandler for EnrolledCoursesCondition {
    fn is_condition(&self) -> bool {
        true
    }

    fn build_predicate(
        &self,
        selector: &str,
        _operator: &Operator,
        _value: Option<&JsonValue>,
        ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        let name = next_param_name();
        let mut params = Params::new();
        params.insert(name.clone(), ctx.user_id.into());

        let mut predicate = Predicate::new(selector, Vec::new(), Operator::InQuery, Conjunction::And);
        predicate.set_subquery(
            format!(
                "SELECT e.courseid FROM {{enrol}} e \
                 JOIN {{user_enrolments}} ue ON ue.enrolid = e.id \
                 WHERE ue.userid = :{name}"
            ),
            params,
        );
        Ok(Some(predicate))
    }
}
