//! Per-widget preferences.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field::FieldDefinition;
use crate::filter::Filter;
use crate::query::SortDirection;

/// Presentation layout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Table,
    Grid,
    Accordion,
    Timeline,
    /// A single figure.
    Stat,
}

impl Layout {
    /// Whether results are split into pages.
    pub fn supports_pagination(self) -> bool {
        matches!(self, Layout::Table | Layout::Grid | Layout::Accordion)
    }
}

/// Display settings for one field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldPreference {
    #[serde(default = "default_true")]
    pub visible: bool,

    /// Position among visible fields, ascending.
    #[serde(default)]
    pub sortorder: i64,
}

fn default_true() -> bool {
    true
}

impl Default for FieldPreference {
    fn default() -> Self {
        Self {
            visible: true,
            sortorder: 0,
        }
    }
}

/// Whether a filter or condition takes part in the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterPreference {
    #[serde(default)]
    pub enabled: bool,
}

/// Preference bag for a configured widget.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    /// Field name to display settings. Empty means "use field defaults".
    #[serde(default)]
    pub available_fields: BTreeMap<String, FieldPreference>,

    /// Filter name to enablement.
    #[serde(default)]
    pub filters: BTreeMap<String, FilterPreference>,

    /// Field sorted by when the request names none.
    #[serde(default)]
    pub default_sort: Option<String>,

    #[serde(default)]
    pub default_sort_direction: SortDirection,

    #[serde(default)]
    pub layout: Layout,

    /// Rows per page; the configured default applies when unset.
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl Preferences {
    /// Whether `field` is displayed.
    ///
    /// Identifier fields are always shown. With no field preferences the
    /// field's own visibility applies; otherwise only listed, visible
    /// fields are shown.
    pub fn is_field_visible(&self, field: &FieldDefinition) -> bool {
        if field.is_identifier() {
            return true;
        }
        if self.available_fields.is_empty() {
            return field.is_visible();
        }
        self.available_fields
            .get(field.name())
            .is_some_and(|p| p.visible)
    }

    /// Position of a field among visible fields. Unlisted fields go last.
    pub fn field_order(&self, name: &str) -> i64 {
        self.available_fields
            .get(name)
            .map_or(i64::MAX, |p| p.sortorder)
    }

    /// Whether `filter` stays in the collection.
    ///
    /// Listed filters follow their `enabled` flag. Unlisted user-facing
    /// filters stay; unlisted conditions are dropped.
    pub fn is_filter_enabled(&self, filter: &Filter) -> bool {
        match self.filters.get(filter.name()) {
            Some(p) => p.enabled,
            None => !filter.is_condition(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::field::IdentifierAttribute;
    use crate::filter::MyGroupsCondition;

    #[test]
    fn layout_pagination_support() {
        assert!(Layout::Table.supports_pagination());
        assert!(Layout::Accordion.supports_pagination());
        assert!(!Layout::Timeline.supports_pagination());
        assert!(!Layout::Stat.supports_pagination());
    }

    #[test]
    fn preferences_deserialize_with_defaults() {
        let prefs: Preferences = serde_json::from_str(
            r#"{
                "available_fields": {"u_email": {"sortorder": 2}},
                "filters": {"my_groups": {"enabled": true}},
                "layout": "grid"
            }"#,
        )
        .unwrap();
        assert!(prefs.available_fields["u_email"].visible);
        assert_eq!(prefs.layout, Layout::Grid);
        assert_eq!(prefs.default_sort_direction, SortDirection::Asc);
        assert!(prefs.per_page.is_none());
    }

    #[test]
    fn field_visibility_rules() {
        let email = FieldDefinition::new("u_email", Some("u.email"), "Email");
        let hidden = FieldDefinition::new("u_city", Some("u.city"), "City").hidden();
        let id = FieldDefinition::new("u_id", Some("u.id"), "ID").with_attribute(IdentifierAttribute);

        let empty = Preferences::default();
        assert!(empty.is_field_visible(&email));
        assert!(!empty.is_field_visible(&hidden));

        let mut prefs = Preferences::default();
        prefs.available_fields.insert(
            "u_city".into(),
            FieldPreference {
                visible: true,
                sortorder: 1,
            },
        );
        assert!(prefs.is_field_visible(&hidden));
        assert!(!prefs.is_field_visible(&email));
        assert!(prefs.is_field_visible(&id));
        assert_eq!(prefs.field_order("u_email"), i64::MAX);
    }

    #[test]
    fn filter_enablement() {
        let text = Filter::new("q", "u.lastname");
        let cond = Filter::new("my_groups", "g.id").with_handler(MyGroupsCondition);

        let mut prefs = Preferences::default();
        assert!(prefs.is_filter_enabled(&text));
        assert!(!prefs.is_filter_enabled(&cond));

        prefs.filters.insert("my_groups".into(), FilterPreference { enabled: true });
        prefs.filters.insert("q".into(), FilterPreference { enabled: false });
        assert!(prefs.is_filter_enabled(&cond));
        assert!(!prefs.is_filter_enabled(&text));
    }
}
