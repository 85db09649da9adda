//! Error responder
//!
//! Turns a [`NormalizedError`] into the final HTTP response. The shape depends
//! on the deployment mode and on whether the request targets the JSON API or a
//! rendered page:
//!
//! | mode        | audience | operational | response                                   |
//! |-------------|----------|-------------|--------------------------------------------|
//! | development | API      | any         | JSON `{status, error, message, stack}`     |
//! | development | Page     | any         | error page with the literal message        |
//! | production  | API      | yes         | JSON `{status, message}`                   |
//! | production  | API      | no          | 500 JSON `{status:"error", message:"Something went wrong"}` |
//! | production  | Page     | yes         | JSON `{status, message}`                   |
//! | production  | Page     | no          | error page with "Please try again later"   |
//!
//! The production/Page/operational row answers with JSON rather than a page.
//! That matches the behavior the application has always had and is kept until
//! product confirms otherwise.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use super::classification::{ErrorStatus, NormalizedError};
use super::failure::RawFailure;
use crate::config::DeploymentMode;

/// Message used for production API faults.
pub const PRODUCTION_FAULT_MESSAGE: &str = "Something went wrong";
/// Message used for production page faults.
pub const PRODUCTION_PAGE_MESSAGE: &str = "Please try again later";
/// Title of every rendered error page.
pub const ERROR_PAGE_TITLE: &str = "Something went wrong";

/// Who the response is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Structured JSON client.
    Api,
    /// Browser expecting a rendered page.
    Page,
}

/// Per-request facts the error path branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub audience: Audience,
    pub mode: DeploymentMode,
}

impl RequestContext {
    pub fn new(audience: Audience, mode: DeploymentMode) -> Self {
        Self { audience, mode }
    }

    /// Audience by path prefix.
    pub fn for_path(path: &str, api_prefix: &str, mode: DeploymentMode) -> Self {
        let audience = if path.starts_with(api_prefix) {
            Audience::Api
        } else {
            Audience::Page
        };
        Self { audience, mode }
    }
}

/// Renders the error page shown to browsers.
pub trait ErrorPage: Send + Sync {
    fn render(&self, title: &str, message: &str) -> String;
}

/// Minimal self-contained error page.
#[derive(Debug, Clone, Default)]
pub struct BasicErrorPage;

impl ErrorPage for BasicErrorPage {
    fn render(&self, title: &str, message: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Natours | {title}</title></head>\n\
             <body><main class=\"main\"><div class=\"error\">\
             <div class=\"error__title\"><h2 class=\"heading-secondary heading-secondary--error\">{title}</h2></div>\
             <div class=\"error__msg\">{message}</div></div></main></body>\n</html>\n",
            title = escape_html(title),
            message = escape_html(message),
        )
    }
}

pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: ErrorStatus,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct VerboseErrorBody<'a> {
    status: ErrorStatus,
    error: Value,
    message: &'a str,
    stack: String,
}

/// Builds error responses.
#[derive(Clone)]
pub struct Responder {
    page: Arc<dyn ErrorPage>,
}

impl Default for Responder {
    fn default() -> Self {
        Self::new(Arc::new(BasicErrorPage))
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

impl Responder {
    pub fn new(page: Arc<dyn ErrorPage>) -> Self {
        Self { page }
    }

    /// Build the response for `err`. `raw` is only echoed in development.
    pub fn respond(&self, err: &NormalizedError, raw: &RawFailure, ctx: &RequestContext) -> Response {
        let status = status_code(err.status_code());
        match (ctx.mode, ctx.audience) {
            (DeploymentMode::Development, Audience::Api) => {
                let body = VerboseErrorBody {
                    status: err.status(),
                    error: error_object(err, raw),
                    message: err.message(),
                    stack: raw.stack(),
                };
                (status, Json(body)).into_response()
            }
            (DeploymentMode::Development, Audience::Page) => {
                tracing::error!(
                    target: "natours::diagnostics",
                    kind = ?raw.kind(),
                    status_code = err.status_code(),
                    "{}",
                    raw
                );
                self.page(status, err.message())
            }
            (DeploymentMode::Production, Audience::Api) => {
                if err.is_operational() {
                    json_error(status, err.status(), err.message())
                } else {
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorStatus::Error,
                        PRODUCTION_FAULT_MESSAGE,
                    )
                }
            }
            (DeploymentMode::Production, Audience::Page) => {
                if err.is_operational() {
                    json_error(status, err.status(), err.message())
                } else {
                    tracing::error!(
                        target: "natours::diagnostics",
                        kind = ?raw.kind(),
                        status_code = err.status_code(),
                        "{}",
                        raw
                    );
                    self.page(status, PRODUCTION_PAGE_MESSAGE)
                }
            }
        }
    }

    fn page(&self, status: StatusCode, message: &str) -> Response {
        (status, Html(self.page.render(ERROR_PAGE_TITLE, message))).into_response()
    }
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn json_error(status: StatusCode, error_status: ErrorStatus, message: &str) -> Response {
    let body = ErrorBody {
        status: error_status,
        message,
    };
    (status, Json(body)).into_response()
}

/// The raw failure as JSON, with the default-filled fields the sink applied.
fn error_object(err: &NormalizedError, raw: &RawFailure) -> Value {
    let mut value = serde_json::to_value(raw).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("statusCode".to_string(), Value::from(err.status_code()));
        map.insert("status".to_string(), Value::from(err.status().as_str()));
        map.insert("message".to_string(), Value::from(err.message()));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classification::classify;
    use crate::error::failure::AppError;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn ctx(mode: DeploymentMode, audience: Audience) -> RequestContext {
        RequestContext::new(audience, mode)
    }

    #[test]
    fn test_context_for_path() {
        let api = RequestContext::for_path("/api/v1/tours", "/api", DeploymentMode::Production);
        assert_eq!(api.audience, Audience::Api);
        let page = RequestContext::for_path("/me", "/api", DeploymentMode::Production);
        assert_eq!(page.audience, Audience::Page);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<script>alert('x')</script> & \"y\""),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; &quot;y&quot;"
        );
    }

    #[tokio::test]
    async fn test_development_api_is_verbose_even_when_operational() {
        let raw = RawFailure::not_found("/api/v1/bogus");
        let err = NormalizedError::verbatim(&raw);
        let response = Responder::default().respond(
            &err,
            &raw,
            &ctx(DeploymentMode::Development, Audience::Api),
        );

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["status"], "fail");
        assert_eq!(json["message"], "Can't find /api/v1/bogus on this server");
        assert_eq!(json["error"]["name"], "AppError");
        assert_eq!(json["error"]["statusCode"], 404);
        assert!(json["stack"]
            .as_str()
            .unwrap()
            .starts_with("AppError: Can't find"));
    }

    #[tokio::test]
    async fn test_development_page_renders_literal_message() {
        let raw = RawFailure::message("template variable missing");
        let err = NormalizedError::verbatim(&raw);
        let response = Responder::default().respond(
            &err,
            &raw,
            &ctx(DeploymentMode::Development, Audience::Page),
        );

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let html = body_text(response).await;
        assert!(html.contains("template variable missing"));
        assert!(html.contains(ERROR_PAGE_TITLE));
    }

    #[tokio::test]
    async fn test_production_api_operational_shows_message() {
        let raw = RawFailure::cast("_id", "abc", "ObjectId");
        let err = classify(&raw);
        let response = Responder::default().respond(
            &err,
            &raw,
            &ctx(DeploymentMode::Production, Audience::Api),
        );

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json, serde_json::json!({"status": "fail", "message": "Invalid _id: abc"}));
    }

    #[tokio::test]
    async fn test_production_api_fault_hides_detail() {
        let raw = RawFailure::Unclassified(crate::error::failure::Unclassified {
            message: Some("database password is hunter2".to_string()),
            status_code: Some(503),
            ..Default::default()
        });
        let err = classify(&raw);
        let response = Responder::default().respond(
            &err,
            &raw,
            &ctx(DeploymentMode::Production, Audience::Api),
        );

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(response).await;
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("stack"));
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "Something went wrong"}));
    }

    #[tokio::test]
    async fn test_production_page_operational_answers_with_json() {
        let raw = RawFailure::App(AppError::new(
            "You are not logged in! Please log in to get access.",
            StatusCode::UNAUTHORIZED,
        ));
        let err = classify(&raw);
        let response = Responder::default().respond(
            &err,
            &raw,
            &ctx(DeploymentMode::Production, Audience::Page),
        );

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "fail");
        assert_eq!(
            json["message"],
            "You are not logged in! Please log in to get access."
        );
    }

    #[tokio::test]
    async fn test_production_page_fault_renders_generic_page() {
        let raw = RawFailure::message("undefined is not a function");
        let err = classify(&raw);
        let response = Responder::default().respond(
            &err,
            &raw,
            &ctx(DeploymentMode::Production, Audience::Page),
        );

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let html = body_text(response).await;
        assert!(html.contains(PRODUCTION_PAGE_MESSAGE));
        assert!(!html.contains("undefined is not a function"));
    }

    struct FixedPage;

    impl ErrorPage for FixedPage {
        fn render(&self, title: &str, message: &str) -> String {
            format!("{title}|{message}")
        }
    }

    #[tokio::test]
    async fn test_custom_error_page() {
        let raw = RawFailure::message("boom");
        let err = classify(&raw);
        let responder = Responder::new(Arc::new(FixedPage));
        let response = responder.respond(&err, &raw, &ctx(DeploymentMode::Production, Audience::Page));
        assert_eq!(
            body_text(response).await,
            format!("{}|{}", ERROR_PAGE_TITLE, PRODUCTION_PAGE_MESSAGE)
        );
    }
}
