//! Built-in attributes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use super::lookup::{LookupCache, LookupSpec, parse_ids};
use super::{Attribute, ConfigurableAttribute};
use crate::db::Row;
use crate::query::JsonValue;

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    let secs = as_f64(value)? as i64;
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// Marks a field as (part of) the row identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierAttribute;

impl Attribute for IdentifierAttribute {
    fn name(&self) -> &'static str {
        "identifier"
    }

    fn transform(&self, value: JsonValue, _row: &Row) -> JsonValue {
        value
    }

    fn is_identifier(&self) -> bool {
        true
    }
}

/// Anchor built from a URL template.
///
/// `{column}` placeholders in the template are replaced with the
/// URL-encoded row value. The label is the cell value unless a label field
/// is bound.
#[derive(Debug, Clone)]
pub struct LinkAttribute {
    url_template: String,
    label_field: Option<String>,
    target: Option<String>,
    button: bool,
}

impl LinkAttribute {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            label_field: None,
            target: None,
            button: false,
        }
    }

    /// Render as a button.
    pub fn button(mut self, button: bool) -> Self {
        self.button = button;
        self
    }

    fn url(&self, row: &Row) -> String {
        let mut url = String::with_capacity(self.url_template.len());
        let mut rest = self.url_template.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let column = &rest[start + 1..start + len];
            url.push_str(&rest[..start]);
            let cell = row.get(column).map(as_text).unwrap_or_default();
            url.push_str(&urlencoding::encode(&cell));
            rest = &rest[start + len + 1..];
        }
        url.push_str(rest);
        url
    }
}

impl Attribute for LinkAttribute {
    fn name(&self) -> &'static str {
        "link"
    }

    fn transform(&self, value: JsonValue, row: &Row) -> JsonValue {
        let label = match &self.label_field {
            Some(field) => row.get(field).map(as_text).unwrap_or_default(),
            None => as_text(&value),
        };
        if label.is_empty() {
            return value;
        }

        let mut anchor = format!("<a href=\"{}\"", self.url(row));
        if let Some(target) = &self.target {
            anchor.push_str(&format!(" target=\"{}\"", ammonia::clean_text(target)));
        }
        if self.button {
            anchor.push_str(" class=\"btn btn-secondary\"");
        }
        anchor.push('>');
        anchor.push_str(&ammonia::clean_text(&label));
        anchor.push_str("</a>");
        JsonValue::String(anchor)
    }

    fn options(&self) -> serde_json::Map<String, JsonValue> {
        let mut options = serde_json::Map::new();
        options.insert("url".into(), self.url_template.clone().into());
        options.insert("button".into(), self.button.into());
        if let Some(field) = &self.label_field {
            options.insert("label_field".into(), field.clone().into());
        }
        options
    }
}

impl ConfigurableAttribute for LinkAttribute {
    fn bind(&mut self, label_field: Option<&str>, custom_target: Option<&str>) {
        self.label_field = label_field.map(str::to_string);
        self.target = custom_target.map(str::to_string);
    }
}

/// `<img>` tag from a URL cell.
#[derive(Debug, Clone, Default)]
pub struct ImageAttribute {
    alt_field: Option<String>,
}

impl ImageAttribute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alt_field(mut self, field: impl Into<String>) -> Self {
        self.alt_field = Some(field.into());
        self
    }
}

impl Attribute for ImageAttribute {
    fn name(&self) -> &'static str {
        "image"
    }

    fn transform(&self, value: JsonValue, row: &Row) -> JsonValue {
        let src = as_text(&value);
        if src.is_empty() {
            return JsonValue::Null;
        }
        let alt = self
            .alt_field
            .as_ref()
            .and_then(|f| row.get(f))
            .map(as_text)
            .unwrap_or_default();
        JsonValue::String(format!(
            "<img src=\"{}\" alt=\"{}\">",
            ammonia::clean_text(&src),
            ammonia::clean_text(&alt)
        ))
    }
}

/// Formats a Unix timestamp.
#[derive(Debug, Clone)]
pub struct DateAttribute {
    format: String,
}

impl Default for DateAttribute {
    fn default() -> Self {
        Self::new("%Y-%m-%d %H:%M")
    }
}

impl DateAttribute {
    /// `format` uses chrono's strftime syntax.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

impl Attribute for DateAttribute {
    fn name(&self) -> &'static str {
        "date"
    }

    fn transform(&self, value: JsonValue, _row: &Row) -> JsonValue {
        match as_timestamp(&value) {
            Some(dt) => JsonValue::String(dt.format(&self.format).to_string()),
            None => JsonValue::Null,
        }
    }

    fn options(&self) -> serde_json::Map<String, JsonValue> {
        let mut options = serde_json::Map::new();
        options.insert("format".into(), self.format.clone().into());
        options
    }
}

/// "3 days ago" from a Unix timestamp.
#[derive(Debug, Clone, Default)]
pub struct TimeAgoAttribute {
    now: Option<DateTime<Utc>>,
}

impl TimeAgoAttribute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the reference clock.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }
}

impl Attribute for TimeAgoAttribute {
    fn name(&self) -> &'static str {
        "timeago"
    }

    fn transform(&self, value: JsonValue, _row: &Row) -> JsonValue {
        let Some(then) = as_timestamp(&value) else {
            return JsonValue::Null;
        };
        let now = self.now.unwrap_or_else(Utc::now);
        let secs = (now - then).num_seconds();
        if secs < 60 {
            return JsonValue::from("just now");
        }

        let (n, unit) = match secs {
            s if s < 3_600 => (s / 60, "minute"),
            s if s < 86_400 => (s / 3_600, "hour"),
            s if s < 30 * 86_400 => (s / 86_400, "day"),
            s if s < 365 * 86_400 => (s / (30 * 86_400), "month"),
            s => (s / (365 * 86_400), "year"),
        };
        let plural = if n == 1 { "" } else { "s" };
        JsonValue::String(format!("{n} {unit}{plural} ago"))
    }
}

/// Percentage, either of the cell value (a fraction) or of two sibling
/// columns.
#[derive(Debug, Clone, Default)]
pub struct PercentageAttribute {
    value_field: Option<String>,
    outof_field: Option<String>,
    decimals: usize,
}

impl PercentageAttribute {
    /// Percentage of the cell value, read as a fraction of one.
    pub fn new() -> Self {
        Self::default()
    }

    /// `value_field / outof_field` from the row.
    pub fn of_fields(value_field: impl Into<String>, outof_field: impl Into<String>) -> Self {
        Self {
            value_field: Some(value_field.into()),
            outof_field: Some(outof_field.into()),
            decimals: 0,
        }
    }

    pub fn decimals(mut self, decimals: usize) -> Self {
        self.decimals = decimals;
        self
    }
}

impl Attribute for PercentageAttribute {
    fn name(&self) -> &'static str {
        "percentage"
    }

    fn transform(&self, value: JsonValue, row: &Row) -> JsonValue {
        let percent = match (&self.value_field, &self.outof_field) {
            (Some(v), Some(o)) => {
                let part = row.get(v).and_then(as_f64);
                let whole = row.get(o).and_then(as_f64);
                match (part, whole) {
                    (Some(_), Some(w)) if w == 0.0 => Some(0.0),
                    (Some(p), Some(w)) => Some(p / w * 100.0),
                    _ => None,
                }
            }
            _ => as_f64(&value).map(|f| f * 100.0),
        };
        match percent {
            Some(p) => JsonValue::String(format!("{p:.prec$}%", prec = self.decimals)),
            None => JsonValue::Null,
        }
    }

    fn options(&self) -> serde_json::Map<String, JsonValue> {
        let mut options = serde_json::Map::new();
        options.insert("decimals".into(), self.decimals.into());
        if let Some(v) = &self.value_field {
            options.insert("value_field".into(), v.clone().into());
        }
        if let Some(o) = &self.outof_field {
            options.insert("outof_field".into(), o.clone().into());
        }
        options
    }
}

impl ConfigurableAttribute for PercentageAttribute {
    /// The label field names the numerator, the custom target the
    /// denominator.
    fn bind(&mut self, label_field: Option<&str>, custom_target: Option<&str>) {
        if let Some(v) = label_field {
            self.value_field = Some(v.to_string());
        }
        if let Some(o) = custom_target {
            self.outof_field = Some(o.to_string());
        }
    }
}

/// "Yes"/"No" from a truthy cell.
#[derive(Debug, Clone)]
pub struct BoolAttribute {
    true_label: String,
    false_label: String,
}

impl Default for BoolAttribute {
    fn default() -> Self {
        Self::new("Yes", "No")
    }
}

impl BoolAttribute {
    pub fn new(true_label: impl Into<String>, false_label: impl Into<String>) -> Self {
        Self {
            true_label: true_label.into(),
            false_label: false_label.into(),
        }
    }
}

impl Attribute for BoolAttribute {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn transform(&self, value: JsonValue, _row: &Row) -> JsonValue {
        let truthy = match &value {
            JsonValue::Null => false,
            JsonValue::Bool(b) => *b,
            JsonValue::String(s) => !matches!(s.trim(), "" | "0" | "false"),
            other => as_f64(other).is_some_and(|f| f != 0.0),
        };
        let label = if truthy {
            &self.true_label
        } else {
            &self.false_label
        };
        JsonValue::String(label.clone())
    }
}

/// Replaces known values, passes others through.
#[derive(Debug, Clone, Default)]
pub struct ValueMapAttribute {
    map: HashMap<String, JsonValue>,
}

impl ValueMapAttribute {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<JsonValue>,
    {
        Self {
            map: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Attribute for ValueMapAttribute {
    fn name(&self) -> &'static str {
        "value_map"
    }

    fn transform(&self, value: JsonValue, _row: &Row) -> JsonValue {
        self.map.get(&as_text(&value)).cloned().unwrap_or(value)
    }
}

/// Replaces a list of ids with their labels.
#[derive(Debug, Clone)]
pub struct LinkedDataAttribute {
    spec: LookupSpec,
    cache: Arc<LookupCache>,
    separator: String,
}

impl LinkedDataAttribute {
    /// Uses the process-wide lookup cache.
    pub fn new(spec: LookupSpec) -> Self {
        Self::with_cache(spec, LookupCache::shared())
    }

    pub fn with_cache(spec: LookupSpec, cache: Arc<LookupCache>) -> Self {
        Self {
            spec,
            cache,
            separator: ", ".to_string(),
        }
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl Attribute for LinkedDataAttribute {
    fn name(&self) -> &'static str {
        "linked_data"
    }

    fn transform(&self, value: JsonValue, _row: &Row) -> JsonValue {
        let ids = parse_ids(&value);
        if ids.is_empty() {
            return value;
        }
        let labels: Vec<String> = ids
            .iter()
            .filter_map(|id| self.cache.get(&self.spec, id))
            .collect();
        JsonValue::String(labels.join(&self.separator))
    }

    fn lookup(&self) -> Option<(&LookupSpec, &Arc<LookupCache>)> {
        Some((&self.spec, &self.cache))
    }

    fn with_table_prefix(&self, prefix: &str) -> Option<Arc<dyn Attribute>> {
        Some(Arc::new(Self {
            spec: self.spec.clone().with_table_prefix(prefix),
            cache: Arc::clone(&self.cache),
            separator: self.separator.clone(),
        }))
    }
}

type Callback = dyn Fn(JsonValue, &Row) -> JsonValue + Send + Sync;

/// Arbitrary transformation.
#[derive(Clone)]
pub struct CallbackAttribute {
    name: &'static str,
    callback: Arc<Callback>,
}

impl CallbackAttribute {
    pub fn new(
        name: &'static str,
        callback: impl Fn(JsonValue, &Row) -> JsonValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for CallbackAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackAttribute")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Attribute for CallbackAttribute {
    fn name(&self) -> &'static str {
        self.name
    }

    fn transform(&self, value: JsonValue, row: &Row) -> JsonValue {
        (self.callback)(value, row)
    }
}
