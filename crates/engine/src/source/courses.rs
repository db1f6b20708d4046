//! Courses report.

use crate::error::EngineResult;
use crate::field::{
    BoolAttribute, DateAttribute, FieldDefinition, IdentifierAttribute, LinkAttribute,
    LinkedDataAttribute, LookupSpec,
};
use crate::filter::{
    AllPolicy, CurrentCourseCondition, DateFilter, EnrolledCoursesCondition, Filter,
    FilterCollection, FilterContext, OptionSource, SelectFilter, TextFilter,
};
use crate::query::{JoinType, Operator, Params, QueryBuilder, SortDirection};

use super::ReportSource;

/// Distinct enrolled users per course.
const ENROLMENT_COUNTS: &str = "SELECT e.courseid, COUNT(DISTINCT ue.userid) AS enrolled \
     FROM {enrol} e JOIN {user_enrolments} ue ON ue.enrolid = e.id \
     GROUP BY e.courseid";

/// Courses with their category and enrolment count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoursesSource;

impl ReportSource for CoursesSource {
    fn name(&self) -> &str {
        "courses"
    }

    fn query_template(&self) -> QueryBuilder {
        let mut qb = QueryBuilder::new();
        qb.set_cte("enrolment_counts", ENROLMENT_COUNTS, Params::new())
            .from("course", "c")
            .join("course_categories", "cc", "cc.id = c.category", JoinType::Left)
            .join("enrolment_counts", "ec", "ec.courseid = c.id", JoinType::Left);
        qb
    }

    fn field_definitions(&self) -> EngineResult<Vec<FieldDefinition>> {
        Ok(vec![
            FieldDefinition::new("c_id", Some("c.id"), "Course ID").with_attribute(IdentifierAttribute),
            FieldDefinition::new("c_fullname", Some("c.fullname"), "Course").with_configurable(
                LinkAttribute::new("/course/view.php?id={c_id}"),
                Some("c_fullname"),
                None,
            ),
            FieldDefinition::new("c_shortname", Some("c.shortname"), "Short name"),
            FieldDefinition::new("cc_name", Some("cc.name"), "Category"),
            FieldDefinition::new("cc_parent", Some("cc.parent"), "Parent category")
                .with_attribute(LinkedDataAttribute::new(LookupSpec::new(
                    "course_categories",
                    "id",
                    "name",
                )))
                .hidden(),
            FieldDefinition::new("c_startdate", Some("c.startdate"), "Start date")
                .with_attribute(DateAttribute::new("%Y-%m-%d"))
                .with_sort_direction(SortDirection::Desc),
            FieldDefinition::new("ec_enrolled", Some("COALESCE(ec.enrolled, 0)"), "Enrolled"),
            FieldDefinition::new("c_visible", Some("c.visible"), "Visibility")
                .with_attribute(BoolAttribute::new("Shown", "Hidden"))
                .hidden(),
        ])
    }

    fn filter_collection(&self, context: &FilterContext) -> EngineResult<FilterCollection> {
        let mut filters = FilterCollection::new(self.name(), context.clone());

        // "all" means every visible category, so courses in hidden ones stay out.
        filters.add_filter(
            Filter::new("category", "c.category")
                .with_label("Category")
                .with_handler(SelectFilter::new(
                    OptionSource::Query {
                        sql: "SELECT cc.id, cc.name FROM {course_categories} cc \
                              WHERE cc.visible = 1 ORDER BY cc.name"
                            .to_string(),
                        params: Params::new(),
                    },
                    AllPolicy::ExpandOptions,
                )),
        )?;
        filters.add_filter(
            Filter::new("fullname", "c.fullname")
                .with_label("Course name")
                .with_handler(TextFilter),
        )?;
        filters.add_filter(
            Filter::new("startdate", "c.startdate")
                .with_label("Start date")
                .with_handler(DateFilter::new(&["this_month", "this_year", "before_today"])?),
        )?;
        filters.add_filter(
            Filter::new("min_enrolled", "COALESCE(ec.enrolled, 0)")
                .with_label("Minimum enrolments")
                .with_operator(Operator::GreaterOrEqual),
        )?;

        filters.add_filter(Filter::new("enrolled", "c.id").with_handler(EnrolledCoursesCondition))?;
        filters.add_filter(Filter::new("current_course", "c.id").with_handler(CurrentCourseCondition))?;

        Ok(filters)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::SqliteDialect;

    #[test]
    fn cte_is_not_prefixed() {
        let mut qb = CoursesSource.query_template();
        qb.set_table_prefix("mdl_").select("c.id", "c_id");
        let (sql, _) = qb.build_sql(&SqliteDialect).unwrap();

        assert!(sql.starts_with("WITH enrolment_counts AS (SELECT e.courseid"));
        assert!(sql.contains("FROM mdl_enrol e JOIN mdl_user_enrolments ue"));
        assert!(sql.contains("FROM mdl_course c"));
        assert!(sql.contains("LEFT JOIN enrolment_counts ec ON ec.courseid = c.id"));
    }

    #[test]
    fn filters_and_conditions() {
        let filters = CoursesSource.filter_collection(&FilterContext::new(2)).unwrap();
        assert_eq!(filters.filters().len(), 6);
        assert!(filters.get_filter("enrolled").unwrap().is_condition());
        assert_eq!(
            filters.get_filter("min_enrolled").unwrap().operator(),
            &Operator::GreaterOrEqual
        );
    }
}
