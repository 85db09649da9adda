//! Bounded body parsing.
//!
//! JSON and url-encoded form bodies are buffered up to the configured ceiling
//! and parsed into a `serde_json::Value`; other content types stream through
//! untouched.

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{FromRequest, Request};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::Form;
use serde_json::{Map, Value};

use crate::error::{AppError, RawFailure};
use crate::pipeline::{BodyFormat, InFlight, PolicyStage, StageOutcome};

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Stage 4: buffers and parses bodies up to `limit` bytes.
#[derive(Debug, Clone)]
pub struct BodyLimitStage {
    limit: usize,
}

impl BodyLimitStage {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    async fn parse(&self, format: BodyFormat, bytes: &Bytes) -> Result<Option<Value>, RawFailure> {
        if bytes.is_empty() {
            return Ok(None);
        }
        match format {
            BodyFormat::Json => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|_| AppError::new("Invalid JSON body", StatusCode::BAD_REQUEST).into()),
            BodyFormat::Form => parse_form(bytes.clone()).await.map(Some),
        }
    }
}

async fn parse_form(bytes: Bytes) -> Result<Value, RawFailure> {
    let request = Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(bytes))
        .map_err(RawFailure::unexpected)?;

    let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
        .await
        .map_err(|_| AppError::new("Invalid form body", StatusCode::BAD_REQUEST))?;

    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Ok(Value::Object(map))
}

#[async_trait]
impl PolicyStage for BodyLimitStage {
    fn name(&self) -> &'static str {
        "body-limit"
    }

    async fn on_request(&self, exchange: &mut InFlight) -> StageOutcome {
        let Some(format) = BodyFormat::from_headers(exchange.headers()) else {
            return StageOutcome::Continue;
        };

        if declared_length(exchange.headers()).is_some_and(|len| len > self.limit) {
            return StageOutcome::Fail(RawFailure::PayloadTooLarge { limit: self.limit });
        }

        let body = std::mem::replace(exchange.request.body_mut(), Body::empty());
        let bytes = match to_bytes(body, self.limit).await {
            Ok(bytes) => bytes,
            Err(_) => return StageOutcome::Fail(RawFailure::PayloadTooLarge { limit: self.limit }),
        };

        let parsed = self.parse(format, &bytes).await;
        *exchange.request.body_mut() = Body::from(bytes);

        match parsed {
            Ok(value) => {
                exchange.body = value;
                exchange.body_format = Some(format);
                StageOutcome::Continue
            }
            Err(failure) => StageOutcome::Fail(failure),
        }
    }
}
