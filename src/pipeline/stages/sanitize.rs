//! Query-operator scrubbing.
//!
//! Keys that a document store would read as an operator (`$gt`, `$where`) or as
//! a nested path (`a.b`) are removed from the parsed body and from the query.
//! The request body and URI are rewritten when anything was removed.

use async_trait::async_trait;
use serde_json::Value;

use crate::pipeline::{InFlight, PolicyStage, StageOutcome};

/// True if `key`, or any bracketed segment of it, starts with `$` or contains `.`.
///
/// ```
/// use natours::pipeline::stages::is_operator_key;
///
/// assert!(is_operator_key("$where"));
/// assert!(is_operator_key("price[$gte]"));
/// assert!(is_operator_key("profile.email"));
/// assert!(!is_operator_key("price[gte]"));
/// ```
pub fn is_operator_key(key: &str) -> bool {
    key.split(['[', ']'])
        .filter(|segment| !segment.is_empty())
        .any(|segment| segment.starts_with('$') || segment.contains('.'))
}

/// Remove operator keys from every object inside `value`. Returns how many
/// keys were dropped.
pub fn sanitize_value(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_operator_key(key));
            let mut removed = before - map.len();
            for nested in map.values_mut() {
                removed += sanitize_value(nested);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(sanitize_value).sum(),
        _ => 0,
    }
}

/// Stage 6: scrubs operator keys from the body and query.
#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizeStage;

#[async_trait]
impl PolicyStage for SanitizeStage {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome {
        let from_body = exchange.body.as_mut().map(sanitize_value).unwrap_or(0);
        if from_body > 0 {
            if let Err(failure) = exchange.rewrite_body() {
                return StageOutcome::Fail(failure);
            }
        }

        let before = exchange.query_pairs.len();
        exchange.query_pairs.retain(|(name, _)| !is_operator_key(name));
        let from_query = before - exchange.query_pairs.len();
        if from_query > 0 {
            if let Err(failure) = exchange.rewrite_query() {
                return StageOutcome::Fail(failure);
            }
        }

        if from_body + from_query > 0 {
            tracing::debug!(
                path = %exchange.summary.path,
                removed = from_body + from_query,
                "Removed operator keys"
            );
        }
        StageOutcome::Continue
    }
}
