//! Per-client request rate limiting.
//!
//! Counts requests per client identity in fixed windows: the first request
//! from a client opens a window, the cap applies until the window expires and
//! the next request after expiry opens a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::pipeline::{InFlight, PolicyStage, StageOutcome};

/// Body of every 429 response.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again in an hour!";

/// Expired windows are pruned once the table holds this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Within the cap.
    Allowed { remaining: u32, resets_in: Duration },
    /// Over the cap until the window resets.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Shared per-client counters.
///
/// Counting happens under a single lock, so concurrent requests from the same
/// client never both take the last slot of a window.
#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `client` now.
    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// Count a request from `client` at `now`.
    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| w.resets_at > now);
        }

        let window = windows
            .entry(client.to_string())
            .and_modify(|w| {
                if now >= w.resets_at {
                    *w = Window {
                        count: 0,
                        resets_at: now + self.window,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                resets_at: now + self.window,
            });

        window.count = window.count.saturating_add(1);
        let resets_in = window.resets_at.saturating_duration_since(now);
        if window.count > self.max {
            RateDecision::Limited {
                retry_after: resets_in,
            }
        } else {
            RateDecision::Allowed {
                remaining: self.max - window.count,
                resets_in,
            }
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Stage 3: caps requests under the API prefix.
#[derive(Debug, Clone)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    prefix: String,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, prefix: impl Into<String>) -> Self {
        Self {
            limiter,
            prefix: prefix.into(),
        }
    }

    fn applies_to(&self, path: &str) -> bool {
        match path.strip_prefix(&self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE).into_response();
    // Round up so clients never retry a moment too early.
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

#[async_trait]
impl PolicyStage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome {
        if !self.applies_to(&exchange.summary.path) {
            return StageOutcome::Continue;
        }

        match self.limiter.check(&exchange.client.0) {
            RateDecision::Allowed { .. } => StageOutcome::Continue,
            RateDecision::Limited { retry_after } => {
                tracing::warn!(
                    client = %exchange.client.0,
                    path = %exchange.summary.path,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                StageOutcome::Terminate(too_many_requests(retry_after))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn test_101st_request_in_window_is_limited() {
        let limiter = RateLimiter::new(100, HOUR);
        let start = Instant::now();

        for i in 0..100 {
            let decision = limiter.check_at("1.2.3.4", start + Duration::from_secs(i));
            assert!(decision.is_allowed(), "request {} should pass", i + 1);
        }

        let decision = limiter.check_at("1.2.3.4", start + Duration::from_secs(120));
        assert_eq!(
            decision,
            RateDecision::Limited {
                retry_after: HOUR - Duration::from_secs(120)
            }
        );
    }

    #[test]
    fn test_first_request_after_window_expiry_passes() {
        let limiter = RateLimiter::new(100, HOUR);
        let start = Instant::now();
        for _ in 0..101 {
            limiter.check_at("1.2.3.4", start);
        }
        assert!(!limiter.check_at("1.2.3.4", start + HOUR - Duration::from_millis(1)).is_allowed());

        let decision = limiter.check_at("1.2.3.4", start + HOUR);
        assert_eq!(
            decision,
            RateDecision::Allowed {
                remaining: 99,
                resets_in: HOUR
            }
        );
    }

    #[test]
    fn test_clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, HOUR);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_allowed());
        assert!(!limiter.check_at("a", now).is_allowed());
        assert!(limiter.check_at("b", now).is_allowed());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_cap() {
        let limiter = Arc::new(RateLimiter::new(50, HOUR));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check_at("shared", now).is_allowed())
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }

    #[test]
    fn test_stage_scope() {
        let stage = RateLimitStage::new(Arc::new(RateLimiter::new(1, HOUR)), "/api");
        assert!(stage.applies_to("/api"));
        assert!(stage.applies_to("/api/v1/tours"));
        assert!(!stage.applies_to("/apiary"));
        assert!(!stage.applies_to("/tour/the-sea-explorer"));
    }

    #[tokio::test]
    async fn test_too_many_requests_response() {
        let response = too_many_requests(Duration::from_millis(1500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], RATE_LIMIT_MESSAGE.as_bytes());
    }
}
