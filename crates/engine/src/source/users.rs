//! Users report: one row per user and group membership.

use crate::error::EngineResult;
use crate::field::{
    BoolAttribute, FieldDefinition, IdentifierAttribute, LinkAttribute, TimeAgoAttribute,
};
use crate::filter::{
    AllPolicy, DateFilter, Filter, FilterCollection, FilterContext, FilterOption,
    LoggedInUserCondition, MyGroupsCondition, OptionSource, SelectFilter, TextFilter,
};
use crate::query::{Conjunction, JoinType, Operator, Params, QueryBuilder, SortDirection};

use super::ReportSource;

/// Users with their groups. A user in several groups appears once per
/// group, so `unique_id` combines the user and group ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsersSource;

impl ReportSource for UsersSource {
    fn name(&self) -> &str {
        "users"
    }

    fn query_template(&self) -> QueryBuilder {
        let mut qb = QueryBuilder::new();
        qb.from("user", "u")
            .join("groups_members", "gm", "gm.userid = u.id", JoinType::Left)
            .join("groups", "g", "g.id = gm.groupid", JoinType::Left);
        qb.where_("u.deleted", vec![0.into()], Operator::Equal, Conjunction::And);
        qb
    }

    fn field_definitions(&self) -> EngineResult<Vec<FieldDefinition>> {
        Ok(vec![
            FieldDefinition::new("u_id", Some("u.id"), "User ID").with_attribute(IdentifierAttribute),
            FieldDefinition::new("g_id", Some("g.id"), "Group ID").with_attribute(IdentifierAttribute),
            FieldDefinition::new("u_fullname", Some("u.firstname || ' ' || u.lastname"), "Full name")
                .with_sort_select("u.lastname")
                .with_configurable(
                    LinkAttribute::new("/user/profile.php?id={u_id}"),
                    Some("u_fullname"),
                    None,
                ),
            FieldDefinition::new("u_firstname", Some("u.firstname"), "First name").hidden(),
            FieldDefinition::new("u_lastname", Some("u.lastname"), "Last name").hidden(),
            FieldDefinition::new("u_username", Some("u.username"), "Username").hidden(),
            FieldDefinition::new("u_email", Some("u.email"), "Email"),
            FieldDefinition::new("g_name", Some("g.name"), "Group"),
            FieldDefinition::new("u_suspended", Some("u.suspended"), "Status")
                .with_attribute(BoolAttribute::new("Suspended", "Active")),
            FieldDefinition::new("u_lastaccess", Some("u.lastaccess"), "Last access")
                .with_attribute(TimeAgoAttribute::new())
                .with_sort_direction(SortDirection::Desc)
                .hidden(),
        ])
    }

    fn filter_collection(&self, context: &FilterContext) -> EngineResult<FilterCollection> {
        let mut filters = FilterCollection::new(self.name(), context.clone());

        filters.add_filter(
            Filter::new("group", "g.id")
                .with_label("Group")
                .with_handler(SelectFilter::new(
                    OptionSource::Query {
                        sql: "SELECT g.id, g.name FROM {groups} g ORDER BY g.name".to_string(),
                        params: Params::new(),
                    },
                    AllPolicy::Ignore,
                )),
        )?;
        filters.add_filter(
            Filter::new("lastname", "u.lastname")
                .with_label("Last name")
                .with_handler(TextFilter),
        )?;
        filters.add_filter(
            Filter::new("lastaccess", "u.lastaccess")
                .with_label("Last access")
                .with_handler(DateFilter::all()),
        )?;
        filters.add_filter(
            Filter::new("suspended", "u.suspended")
                .with_label("Status")
                .with_handler(SelectFilter::new(
                    OptionSource::Static(vec![
                        FilterOption::new(0, "Active"),
                        FilterOption::new(1, "Suspended"),
                    ]),
                    AllPolicy::Ignore,
                )),
        )?;

        filters.add_filter(Filter::new("my_groups", "g.id").with_handler(MyGroupsCondition))?;
        filters.add_filter(Filter::new("current_user", "u.id").with_handler(LoggedInUserCondition))?;

        Ok(filters)
    }
}
