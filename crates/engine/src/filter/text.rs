//! Free-text search filter.

use super::{FilterContext, FilterHandler};
use crate::error::{EngineError, EngineResult};
use crate::query::{Conjunction, JsonValue, Operator, Predicate};

/// Substring match on the trimmed input.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFilter;

impl FilterHandler for TextFilter {
    fn default_operator(&self) -> Option<Operator> {
        Some(Operator::LikeWildcard)
    }

    fn validate(&self, name: &str, value: JsonValue) -> EngineResult<JsonValue> {
        let text = match &value {
            JsonValue::String(s) => s.trim().to_string(),
            JsonValue::Number(n) => n.to_string(),
            _ => {
                return Err(EngineError::InvalidFilterValue {
                    name: name.to_string(),
                    reason: "expected text".to_string(),
                });
            }
        };
        Ok(JsonValue::String(text))
    }

    fn build_predicate(
        &self,
        selector: &str,
        operator: &Operator,
        value: Option<&JsonValue>,
        _ctx: &FilterContext,
    ) -> EngineResult<Option<Predicate>> {
        match value.and_then(JsonValue::as_str) {
            Some(text) if !text.is_empty() => Ok(Some(Predicate::new(
                selector,
                vec![text.into()],
                operator.clone(),
                Conjunction::And,
            ))),
            _ => Ok(None),
        }
    }
}
