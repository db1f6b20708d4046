//! Field definitions and the attribute pipeline.
//!
//! A field names one output column: how to select it, whether it is shown
//! and sortable, and the chain of attributes that turns its raw value into
//! a display value. Attributes run left to right, each receiving the
//! previous output and the untouched raw row.

mod attributes;
mod lookup;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use attributes::{
    BoolAttribute, CallbackAttribute, DateAttribute, IdentifierAttribute, ImageAttribute,
    LinkAttribute, LinkedDataAttribute, PercentageAttribute, TimeAgoAttribute, ValueMapAttribute,
};
pub use lookup::{LookupCache, LookupSpec, parse_ids};
pub(crate) use lookup::is_safe_identifier;

use crate::db::Row;
use crate::query::{JsonValue, SortDirection};

/// Transforms one cell.
pub trait Attribute: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Transform `value`. `row` is the raw row and is never modified.
    fn transform(&self, value: JsonValue, row: &Row) -> JsonValue;

    /// Identifier attributes make their field part of the row identity.
    fn is_identifier(&self) -> bool {
        false
    }

    /// Configuration, for display and debugging.
    fn options(&self) -> serde_json::Map<String, JsonValue> {
        serde_json::Map::new()
    }

    /// Labels this attribute reads, so they can be prefetched.
    fn lookup(&self) -> Option<(&LookupSpec, &Arc<LookupCache>)> {
        None
    }

    /// Copy reading prefixed tables. `None` when the attribute reads none.
    fn with_table_prefix(&self, _prefix: &str) -> Option<Arc<dyn Attribute>> {
        None
    }
}

/// Attribute whose sibling columns are chosen by configuration.
pub trait ConfigurableAttribute: Attribute {
    /// Called once while the field is assembled.
    fn bind(&mut self, label_field: Option<&str>, custom_target: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// One output column.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    name: String,
    select: Option<String>,
    title: String,
    visibility: Visibility,
    sortable: bool,
    sort_direction: SortDirection,
    sort_select: Option<String>,
    attributes: Vec<Arc<dyn Attribute>>,
    options: serde_json::Map<String, JsonValue>,
}

impl FieldDefinition {
    /// `select` is None for computed fields whose value comes entirely from
    /// attributes.
    pub fn new(name: impl Into<String>, select: Option<&str>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            select: select.map(str::to_string),
            title: title.into(),
            visibility: Visibility::Visible,
            sortable: true,
            sort_direction: SortDirection::Asc,
            sort_select: None,
            attributes: Vec::new(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: impl Attribute + 'static) -> Self {
        self.attributes.push(Arc::new(attribute));
        self
    }

    /// Bind a configurable attribute's sibling columns, then append it.
    pub fn with_configurable(
        mut self,
        mut attribute: impl ConfigurableAttribute + 'static,
        label_field: Option<&str>,
        custom_target: Option<&str>,
    ) -> Self {
        attribute.bind(label_field, custom_target);
        self.attributes.push(Arc::new(attribute));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = Visibility::Hidden;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn with_sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = direction;
        self
    }

    /// Expression to order by instead of the select expression.
    pub fn with_sort_select(mut self, expr: impl Into<String>) -> Self {
        self.sort_select = Some(expr.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn select(&self) -> Option<&str> {
        self.select.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// Identifier fields are never hidden.
    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Visible || self.is_identifier()
    }

    pub fn is_sortable(&self) -> bool {
        self.sortable && (self.sort_select.is_some() || self.select.is_some())
    }

    pub fn sort_direction(&self) -> SortDirection {
        self.sort_direction
    }

    /// Expression used in ORDER BY.
    pub fn sort_expression(&self) -> Option<&str> {
        self.sort_select.as_deref().or(self.select.as_deref())
    }

    pub fn attributes(&self) -> &[Arc<dyn Attribute>] {
        &self.attributes
    }

    pub fn options(&self) -> &serde_json::Map<String, JsonValue> {
        &self.options
    }

    pub fn get_option(&self, key: &str) -> Option<&JsonValue> {
        self.options.get(key)
    }

    pub fn is_identifier(&self) -> bool {
        self.attributes.iter().any(|a| a.is_identifier())
    }

    /// Run the attribute chain over `value`.
    /// Point table-reading attributes at prefixed tables.
    pub fn set_table_prefix(&mut self, prefix: &str) {
        for attribute in &mut self.attributes {
            if let Some(bound) = attribute.with_table_prefix(prefix) {
                *attribute = bound;
            }
        }
    }

    pub fn transform_data(&self, value: JsonValue, row: &Row) -> JsonValue {
        self.attributes
            .iter()
            .fold(value, |acc, attribute| attribute.transform(acc, row))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn computed_field_percentage() {
        let field = FieldDefinition::new("progress", None, "Progress")
            .with_attribute(PercentageAttribute::of_fields("value", "outof"));
        let row = json!({"value": 5, "outof": 10}).as_object().cloned().unwrap();
        assert_eq!(field.transform_data(JsonValue::Null, &row), json!("50%"));
    }

    #[test]
    fn attributes_apply_in_declaration_order() {
        let append = |suffix: &'static str| {
            CallbackAttribute::new("append", move |v, _| {
                json!(format!("{}{suffix}", v.as_str().unwrap_or_default()))
            })
        };
        let field = FieldDefinition::new("f", Some("t.f"), "F")
            .with_attribute(append("a"))
            .with_attribute(append("b"))
            .with_attribute(append("c"));
        assert_eq!(field.transform_data(json!(""), &Row::new()), json!("abc"));
    }

    #[test]
    fn transform_does_not_touch_row() {
        let field = FieldDefinition::new("active", Some("u.suspended"), "Active")
            .with_attribute(BoolAttribute::new("No", "Yes"));
        let row = json!({"active": 0}).as_object().cloned().unwrap();
        let before = row.clone();
        assert_eq!(field.transform_data(json!(0), &row), json!("Yes"));
        assert_eq!(row, before);
    }

    #[test]
    fn identifiers_are_never_hidden() {
        let id = FieldDefinition::new("u_id", Some("u.id"), "ID")
            .with_attribute(IdentifierAttribute)
            .hidden();
        assert!(id.is_identifier());
        assert!(id.is_visible());

        let plain = FieldDefinition::new("u_email", Some("u.email"), "Email").hidden();
        assert!(!plain.is_visible());
    }

    #[test]
    fn sort_expression_prefers_sort_select() {
        let f = FieldDefinition::new("name", Some("u.firstname"), "Name")
            .with_sort_select("u.lastname");
        assert_eq!(f.sort_expression(), Some("u.lastname"));
        assert!(f.is_sortable());

        let computed = FieldDefinition::new("pct", None, "Pct");
        assert!(!computed.is_sortable());
    }

    #[test]
    fn configurable_link_is_bound_on_assembly() {
        let field = FieldDefinition::new("c_id", Some("c.id"), "Course").with_configurable(
            LinkAttribute::new("/course/{c_id}"),
            Some("c_fullname"),
            None,
        );
        let row = json!({"c_id": 3, "c_fullname": "Maths"}).as_object().cloned().unwrap();
        assert_eq!(
            field.transform_data(json!(3), &row),
            json!("<a href=\"/course/3\">Maths</a>")
        );
        assert_eq!(field.attributes()[0].options()["label_field"], json!("c_fullname"));
    }
}
