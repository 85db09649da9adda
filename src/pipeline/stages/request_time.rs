use async_trait::async_trait;
use chrono::Utc;

use crate::pipeline::{InFlight, PolicyStage, RequestTime, StageOutcome};

/// Stage 9: stamps the request with the time it cleared the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTimeStage;

#[async_trait]
impl PolicyStage for RequestTimeStage {
    fn name(&self) -> &'static str {
        "request-time"
    }

    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome {
        exchange.request_time = Some(RequestTime(Utc::now()));
        StageOutcome::Continue
    }
}
