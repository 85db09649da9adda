use async_trait::async_trait;
use axum::response::Response;

use crate::config::DeploymentMode;
use crate::pipeline::{InFlight, PolicyStage, RequestSummary, StageOutcome};

/// Stage 2: one log line per response, development only.
#[derive(Debug, Clone, Copy)]
pub struct RequestLogStage {
    enabled: bool,
}

impl RequestLogStage {
    pub fn new(mode: DeploymentMode) -> Self {
        Self {
            enabled: mode.is_development(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl PolicyStage for RequestLogStage {
    fn name(&self) -> &'static str {
        "request-log"
    }

    async fn on_request(&self, _exchange: &mut InFlight) -> StageOutcome {
        StageOutcome::Continue
    }

    fn on_response(&self, summary: &RequestSummary, response: &mut Response) {
        if !self.enabled {
            return;
        }
        let elapsed = summary.started.elapsed();
        tracing::info!(
            target: "natours::http",
            method = %summary.method,
            target_uri = %summary.target,
            status = response.status().as_u16(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "{} {} {} {:.3} ms",
            summary.method,
            summary.target,
            response.status().as_u16(),
            elapsed.as_secs_f64() * 1000.0
        );
    }
}
