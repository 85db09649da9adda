//! Transport security headers.
//!
//! The content-security-policy allows the third parties the site depends on:
//! map tiles, the payment widget, fonts and the CDN-hosted scripts.

use async_trait::async_trait;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::Response;

use crate::pipeline::{InFlight, PolicyStage, RequestSummary, StageOutcome};

const SCRIPT_SRC_URLS: &[&str] = &[
    "https://unpkg.com/",
    "https://tile.openstreetmap.org",
    "https://js.stripe.com",
    "https://m.stripe.network",
    "https://*.cloudflare.com",
];

const STYLE_SRC_URLS: &[&str] = &[
    "https://unpkg.com/",
    "https://tile.openstreetmap.org",
    "https://fonts.googleapis.com/",
];

const CONNECT_SRC_URLS: &[&str] = &[
    "https://unpkg.com",
    "https://tile.openstreetmap.org",
    "https://*.stripe.com",
    "https://*.cloudflare.com/",
    "https://bundle.js:*",
    "ws://127.0.0.1:*/",
];

const FONT_SRC_URLS: &[&str] = &["fonts.googleapis.com", "fonts.gstatic.com"];

fn directive(name: &'static str, base: &[&'static str], extra: &[&'static str]) -> String {
    let mut parts = vec![name];
    parts.extend_from_slice(base);
    parts.extend_from_slice(extra);
    parts.join(" ")
}

/// The content-security-policy header value.
pub fn content_security_policy() -> String {
    [
        directive(
            "default-src",
            &["'self'", "data:", "blob:", "https:", "http:", "ws:"],
            &[],
        ),
        directive(
            "connect-src",
            &["'self'", "'unsafe-inline'", "data:", "blob:"],
            CONNECT_SRC_URLS,
        ),
        directive("base-uri", &["'self'"], &[]),
        directive("frame-src", &["'self'", "https://js.stripe.com"], &[]),
        directive(
            "script-src",
            &["'self'", "https:", "http:", "blob:"],
            SCRIPT_SRC_URLS,
        ),
        directive(
            "style-src",
            &["'self'", "https:", "http:", "'unsafe-inline'"],
            STYLE_SRC_URLS,
        ),
        directive(
            "worker-src",
            &["'self'", "data:", "blob:", "https://m.stripe.network"],
            &[],
        ),
        directive("object-src", &["'none'"], &[]),
        directive("child-src", &["'self'", "blob:"], &[]),
        directive(
            "img-src",
            &["'self'", "blob:", "data:", "https:", "http:"],
            &[],
        ),
        directive("form-action", &["'self'"], &[]),
        directive(
            "font-src",
            &["'self'", "https:", "http:", "data:"],
            FONT_SRC_URLS,
        ),
        "upgrade-insecure-requests".to_string(),
    ]
    .join(";")
}

/// Stage 1: attaches security headers to every response.
#[derive(Debug, Clone)]
pub struct SecurityHeadersStage {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for SecurityHeadersStage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityHeadersStage {
    pub fn new() -> Self {
        let mut headers = vec![
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("SAMEORIGIN"),
            ),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("no-referrer"),
            ),
            (
                header::X_DNS_PREFETCH_CONTROL,
                HeaderValue::from_static("off"),
            ),
        ];
        // Built from static ASCII, so this cannot fail.
        if let Ok(csp) = HeaderValue::from_str(&content_security_policy()) {
            headers.insert(0, (header::CONTENT_SECURITY_POLICY, csp));
        }
        Self { headers }
    }
}

#[async_trait]
impl PolicyStage for SecurityHeadersStage {
    fn name(&self) -> &'static str {
        "security-headers"
    }

    async fn on_request(&self, _exchange: &mut InFlight) -> StageOutcome {
        StageOutcome::Continue
    }

    fn on_response(&self, _summary: &RequestSummary, response: &mut Response) {
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            headers.entry(name).or_insert_with(|| value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csp_contains_expected_directives() {
        let csp = content_security_policy();
        assert!(csp.starts_with("default-src 'self' data: blob: https: http: ws:;"));
        assert!(csp.contains("frame-src 'self' https://js.stripe.com"));
        assert!(csp.contains("object-src 'none'"));
        assert!(csp.contains("font-src 'self' https: http: data: fonts.googleapis.com fonts.gstatic.com"));
        assert!(csp.ends_with(";upgrade-insecure-requests"));
    }

    #[test]
    fn test_stage_carries_csp_first() {
        let stage = SecurityHeadersStage::new();
        assert_eq!(stage.headers[0].0, header::CONTENT_SECURITY_POLICY);
        assert_eq!(stage.headers.len(), 5);
    }

    #[test]
    fn test_on_response_keeps_existing_values() {
        let stage = SecurityHeadersStage::new();
        let mut response = Response::new(axum::body::Body::empty());
        response
            .headers_mut()
            .insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

        let summary = RequestSummary {
            method: axum::http::Method::GET,
            target: "/".to_string(),
            path: "/".to_string(),
            context: crate::error::RequestContext::new(
                crate::error::Audience::Page,
                crate::config::DeploymentMode::Production,
            ),
            started: std::time::Instant::now(),
        };
        stage.on_response(&summary, &mut response);

        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(response.headers().contains_key(header::CONTENT_SECURITY_POLICY));
    }
}
