use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::pipeline::{InFlight, PolicyStage, QueryParams, QueryValue, StageOutcome};

/// Collapse repeated query parameters.
///
/// Names on the allow-list keep every value, in order, once they repeat.
/// Every other name keeps only its last value.
pub fn guard_parameters(pairs: &[(String, String)], whitelist: &[String]) -> QueryParams {
    let mut params: BTreeMap<String, QueryValue> = BTreeMap::new();
    for (name, value) in pairs {
        let allowed = whitelist.iter().any(|w| w == name);
        match params.get_mut(name) {
            Some(existing) if allowed => match existing {
                QueryValue::Many(values) => values.push(value.clone()),
                QueryValue::Single(first) => {
                    let first = std::mem::take(first);
                    *existing = QueryValue::Many(vec![first, value.clone()]);
                }
            },
            Some(existing) => *existing = QueryValue::Single(value.clone()),
            None => {
                params.insert(name.clone(), QueryValue::Single(value.clone()));
            }
        }
    }
    QueryParams(params)
}

/// Stage 7: builds the guarded [`QueryParams`] and rewrites the request URI
/// to match when values were collapsed.
#[derive(Debug, Clone)]
pub struct ParamPollutionStage {
    whitelist: Vec<String>,
}

impl ParamPollutionStage {
    pub fn new(whitelist: Vec<String>) -> Self {
        Self { whitelist }
    }
}

#[async_trait]
impl PolicyStage for ParamPollutionStage {
    fn name(&self) -> &'static str {
        "param-pollution"
    }

    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome {
        exchange.query = guard_parameters(&exchange.query_pairs, &self.whitelist);

        // Allow-listed repeats survive, so fewer pairs means something collapsed.
        let guarded = exchange.query.to_pairs();
        if guarded.len() != exchange.query_pairs.len() {
            exchange.query_pairs = guarded;
            if let Err(failure) = exchange.rewrite_query() {
                return StageOutcome::Fail(failure);
            }
        }
        StageOutcome::Continue
    }
}
