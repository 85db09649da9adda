//! Policy chain
//!
//! Every request runs through a fixed, ordered list of policy stages before
//! it reaches the dispatcher:
//!
//! 1. [`SecurityHeadersStage`] - content-security-policy and related headers
//! 2. [`RequestLogStage`] - one log line per response, outside production
//! 3. [`RateLimitStage`] - per-client cap under the API prefix
//! 4. [`BodyLimitStage`] - bounded JSON/form body parsing
//! 5. [`CookieStage`] - `Cookie` header parsing
//! 6. [`SanitizeStage`] - strips query-operator keys
//! 7. [`ParamPollutionStage`] - collapses repeated query parameters
//! 8. response compression - `tower_http::compression::CompressionLayer`
//!    wrapped around the whole chain by [`crate::server::build_app`]
//! 9. [`RequestTimeStage`] - request timestamp annotation
//!
//! Stage 8 never looks at the request, so it runs as a layer outside the
//! chain driver. It compresses every response the driver produces, including
//! the ones built by the error sink.
//!
//! A stage answers each request with a [`StageOutcome`]. The chain driver
//! interprets it: `Continue` moves to the next stage, `Terminate` answers with
//! the stage's response, `Fail` hands the failure to the [`ErrorSink`]. After
//! the response exists (from a stage, the sink or the dispatcher), the response
//! hooks of every stage that ran are applied in reverse order.

pub mod exchange;
pub mod stages;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::AppConfig;
use crate::error::{ErrorSink, FailureSlot, RawFailure};

pub use exchange::{
    BodyFormat, ClientId, Cookies, InFlight, ParsedBody, QueryParams, QueryValue, RequestSummary,
    RequestTime,
};
pub use stages::{
    BodyLimitStage, CookieStage, ParamPollutionStage, RateLimitStage, RateLimiter,
    RequestLogStage, RequestTimeStage, SanitizeStage, SecurityHeadersStage,
};

/// What a stage decided about the request.
#[derive(Debug)]
pub enum StageOutcome {
    /// Pass the request to the next stage.
    Continue,
    /// Answer with this response; later stages and the dispatcher are skipped.
    Terminate(Response),
    /// Hand this failure to the error sink; later stages and the dispatcher are skipped.
    Fail(RawFailure),
}

/// One cross-cutting request policy.
#[async_trait]
pub trait PolicyStage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or rewrite the request.
    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome;

    /// Adjust the final response. Runs only if `on_request` ran.
    fn on_response(&self, _summary: &RequestSummary, _response: &mut Response) {}
}

/// The ordered stages plus the sink every failure ends in.
pub struct PolicyChain {
    config: Arc<AppConfig>,
    sink: ErrorSink,
    stages: Vec<Arc<dyn PolicyStage>>,
}

impl std::fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

impl PolicyChain {
    /// An empty chain.
    pub fn new(config: Arc<AppConfig>, sink: ErrorSink) -> Self {
        Self {
            config,
            sink,
            stages: Vec::new(),
        }
    }

    /// The production stage order.
    pub fn standard(config: Arc<AppConfig>, sink: ErrorSink) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max,
            config.rate_limit.window(),
        ));
        Self::standard_with_limiter(config, sink, limiter)
    }

    /// The production stage order with a caller-owned rate limiter.
    pub fn standard_with_limiter(
        config: Arc<AppConfig>,
        sink: ErrorSink,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let chain = Self::new(config.clone(), sink);
        chain
            .with_stage(SecurityHeadersStage::new())
            .with_stage(RequestLogStage::new(config.mode))
            .with_stage(RateLimitStage::new(limiter, config.api.prefix.clone()))
            .with_stage(BodyLimitStage::new(config.body.limit_bytes))
            .with_stage(CookieStage)
            .with_stage(SanitizeStage)
            .with_stage(ParamPollutionStage::new(config.security.whitelist.clone()))
            .with_stage(RequestTimeStage)
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: impl PolicyStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the stages, then `next` (the dispatcher) if none short-circuited.
    pub async fn run(&self, request: Request, next: Next) -> Response {
        let mut exchange = InFlight::new(request, &self.config);
        let summary = exchange.summary.clone();

        let mut ran = 0;
        let mut early = None;
        for stage in &self.stages {
            ran += 1;
            match stage.on_request(&mut exchange).await {
                StageOutcome::Continue => {}
                StageOutcome::Terminate(response) => {
                    tracing::debug!(stage = stage.name(), path = %summary.path, "stage terminated request");
                    early = Some(response);
                    break;
                }
                StageOutcome::Fail(failure) => {
                    tracing::debug!(stage = stage.name(), path = %summary.path, "stage failed request");
                    early = Some(self.sink.handle(failure, &summary.context));
                    break;
                }
            }
        }

        let mut response = match early {
            Some(response) => response,
            None => self.settle(next.run(exchange.into_request()).await, &summary),
        };

        for stage in self.stages[..ran].iter().rev() {
            stage.on_response(&summary, &mut response);
        }
        response
    }

    /// Route a handler failure carried in the response to the sink.
    fn settle(&self, mut response: Response, summary: &RequestSummary) -> Response {
        match response.extensions_mut().remove::<FailureSlot>() {
            Some(FailureSlot(failure)) => self.sink.handle(failure, &summary.context),
            None => response,
        }
    }
}

/// `axum::middleware::from_fn_with_state` entry point for the chain.
pub async fn drive(State(chain): State<Arc<PolicyChain>>, request: Request, next: Next) -> Response {
    chain.run(request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentMode;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{middleware, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct Recorder {
        name: &'static str,
        outcome: fn() -> StageOutcome,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PolicyStage for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_request(&self, _exchange: &mut InFlight) -> StageOutcome {
            self.log.lock().unwrap().push(format!("req:{}", self.name));
            (self.outcome)()
        }

        fn on_response(&self, _summary: &RequestSummary, response: &mut Response) {
            self.log.lock().unwrap().push(format!("res:{}", self.name));
            response
                .headers_mut()
                .append("x-seen-by", HeaderValue::from_static(self.name));
        }
    }

    fn app(chain: PolicyChain, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/api/ok",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            )
            .route(
                "/api/broken",
                get(|| async { Err::<&str, _>(RawFailure::message("handler blew up")) }),
            )
            .layer(middleware::from_fn_with_state(Arc::new(chain), drive))
    }

    fn config() -> Arc<AppConfig> {
        Arc::new(AppConfig::default().with_mode(DeploymentMode::Production))
    }

    fn recorder(name: &'static str, outcome: fn() -> StageOutcome, log: &Arc<Mutex<Vec<String>>>) -> Recorder {
        Recorder {
            name,
            outcome,
            log: log.clone(),
        }
    }

    fn get_request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_all_continue_reaches_handler_and_unwinds_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = PolicyChain::new(config(), ErrorSink::default())
            .with_stage(recorder("a", || StageOutcome::Continue, &log))
            .with_stage(recorder("b", || StageOutcome::Continue, &log));

        let response = app(chain, hits.clone())
            .oneshot(get_request("/api/ok"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["req:a", "req:b", "res:b", "res:a"]
        );
    }

    #[tokio::test]
    async fn test_terminate_short_circuits_later_stages_and_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = PolicyChain::new(config(), ErrorSink::default())
            .with_stage(recorder("a", || StageOutcome::Continue, &log))
            .with_stage(recorder(
                "stop",
                || StageOutcome::Terminate(StatusCode::IM_A_TEAPOT.into_response()),
                &log,
            ))
            .with_stage(recorder("never", || StageOutcome::Continue, &log));

        let response = app(chain, hits.clone())
            .oneshot(get_request("/api/ok"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["req:a", "req:stop", "res:stop", "res:a"]
        );
        let seen: Vec<_> = response.headers().get_all("x-seen-by").iter().collect();
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_goes_to_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = PolicyChain::new(config(), ErrorSink::default()).with_stage(recorder(
            "deny",
            || StageOutcome::Fail(RawFailure::token_malformed("jwt malformed")),
            &log,
        ));

        let response = app(chain, hits.clone())
            .oneshot(get_request("/api/ok"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "Invalid Token, please login again");
    }

    #[tokio::test]
    async fn test_handler_failure_goes_to_sink() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = PolicyChain::new(config(), ErrorSink::default());

        let response = app(chain, hits)
            .oneshot(get_request("/api/broken"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<FailureSlot>().is_none());
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Something went wrong");
    }

    #[test]
    fn test_standard_order() {
        let chain = PolicyChain::standard(config(), ErrorSink::default());
        assert_eq!(
            chain.stage_names(),
            vec![
                "security-headers",
                "request-log",
                "rate-limit",
                "body-limit",
                "cookies",
                "sanitize",
                "param-pollution",
                "request-time",
            ]
        );
    }
}
