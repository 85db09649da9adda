//! In-flight request state shared by the policy stages.
//!
//! Stages read and rewrite an [`InFlight`] exchange. Once every stage has
//! continued, the exchange is turned back into an HTTP request whose extensions
//! carry what the stages produced ([`QueryParams`], [`ParsedBody`],
//! [`Cookies`], [`RequestTime`], [`ClientId`], [`RequestContext`]), so route
//! handlers can extract them with `axum::Extension`.
//!
//! Stages that remove or collapse input also rewrite the request itself
//! ([`InFlight::rewrite_body`], [`InFlight::rewrite_query`]), so handlers using
//! the plain `Json`, `Form` or `Query` extractors see the same cleaned values.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, Request};
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::{RawFailure, RequestContext};

/// Client identity used for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl ClientId {
    pub const UNKNOWN: &'static str = "unknown";

    /// Peer address, or the first `X-Forwarded-For` hop when proxies are trusted.
    pub fn resolve(request: &Request, trust_proxy: bool) -> Self {
        if trust_proxy {
            if let Some(forwarded) = forwarded_for(request.headers()) {
                return ClientId(forwarded);
            }
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientId(addr.ip().to_string()))
            .unwrap_or_else(|| ClientId(Self::UNKNOWN.to_string()))
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A query parameter value after pollution guarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// The single value, or the last of many.
    pub fn last(&self) -> &str {
        match self {
            QueryValue::Single(v) => v,
            QueryValue::Many(vs) => vs.last().map(String::as_str).unwrap_or(""),
        }
    }
}

/// Guarded query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueryParams(pub BTreeMap<String, QueryValue>);

impl QueryParams {
    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten back into name/value pairs, names in sorted order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (name, value) in &self.0 {
            match value {
                QueryValue::Single(v) => pairs.push((name.clone(), v.clone())),
                QueryValue::Many(vs) => {
                    pairs.extend(vs.iter().map(|v| (name.clone(), v.clone())));
                }
            }
        }
        pairs
    }
}

/// Body encodings the pipeline buffers and parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
}

impl BodyFormat {
    /// Format named by the `Content-Type` header, if it is one we parse.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime == "application/json"
            || (mime.starts_with("application/") && mime.ends_with("+json"))
        {
            Some(BodyFormat::Json)
        } else if mime == "application/x-www-form-urlencoded" {
            Some(BodyFormat::Form)
        } else {
            None
        }
    }

    /// Serialize `value` in this format.
    pub fn encode(self, value: &Value) -> Result<Vec<u8>, RawFailure> {
        match self {
            BodyFormat::Json => serde_json::to_vec(value).map_err(RawFailure::unexpected),
            BodyFormat::Form => serde_urlencoded::to_string(form_pairs(value))
                .map(String::into_bytes)
                .map_err(RawFailure::unexpected),
        }
    }
}

/// Form fields of a parsed form body. Arrays become repeated fields.
fn form_pairs(value: &Value) -> Vec<(String, String)> {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Null => Some(String::new()),
            Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    let Value::Object(map) = value else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for (name, field) in map {
        match field {
            Value::Array(items) => {
                pairs.extend(items.iter().filter_map(scalar).map(|v| (name.clone(), v)));
            }
            other => pairs.extend(scalar(other).map(|v| (name.clone(), v))),
        }
    }
    pairs
}

/// Parsed JSON or form body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub Value);

/// Cookies from the `Cookie` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(pub BTreeMap<String, String>);

impl Cookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// When the request entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTime(pub DateTime<Utc>);

impl RequestTime {
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// What response hooks may know about the request.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    /// Path and query as sent by the client.
    pub target: String,
    pub path: String,
    pub context: RequestContext,
    pub started: Instant,
}

/// A request travelling through the policy chain.
#[derive(Debug)]
pub struct InFlight {
    pub request: Request,
    pub summary: RequestSummary,
    pub client: ClientId,
    /// Raw query pairs in order of appearance.
    pub query_pairs: Vec<(String, String)>,
    pub query: QueryParams,
    pub body: Option<Value>,
    /// Encoding of `body`, set when the body was buffered.
    pub body_format: Option<BodyFormat>,
    pub cookies: Cookies,
    pub request_time: Option<RequestTime>,
}

impl InFlight {
    pub fn new(request: Request, config: &AppConfig) -> Self {
        let uri = request.uri();
        let path = uri.path().to_string();
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| path.clone());
        let query_pairs = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|Query(pairs)| pairs)
            .unwrap_or_default();

        let summary = RequestSummary {
            method: request.method().clone(),
            target,
            context: RequestContext::for_path(&path, &config.api.prefix, config.mode),
            path,
            started: Instant::now(),
        };
        let client = ClientId::resolve(&request, config.server.trust_proxy);

        Self {
            request,
            summary,
            client,
            query_pairs,
            query: QueryParams::default(),
            body: None,
            body_format: None,
            cookies: Cookies::default(),
            request_time: None,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// Re-encode `body` into the request in its original format and fix
    /// `Content-Length`. Does nothing when no body was parsed.
    pub fn rewrite_body(&mut self) -> Result<(), RawFailure> {
        let (Some(body), Some(format)) = (&self.body, self.body_format) else {
            return Ok(());
        };
        let bytes = format.encode(body)?;
        self.request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        *self.request.body_mut() = Body::from(bytes);
        Ok(())
    }

    /// Replace the request URI's query string with `query_pairs`.
    pub fn rewrite_query(&mut self) -> Result<(), RawFailure> {
        let query = serde_urlencoded::to_string(&self.query_pairs).map_err(RawFailure::unexpected)?;
        let path = self.request.uri().path();
        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        };

        let mut parts = self.request.uri().clone().into_parts();
        parts.path_and_query =
            Some(PathAndQuery::try_from(path_and_query).map_err(RawFailure::unexpected)?);
        *self.request.uri_mut() = Uri::from_parts(parts).map_err(RawFailure::unexpected)?;
        Ok(())
    }

    /// Hand the stage results to the dispatcher as request extensions.
    pub fn into_request(self) -> Request {
        let mut request = self.request;
        let extensions = request.extensions_mut();
        extensions.insert(self.summary.context);
        extensions.insert(self.client);
        extensions.insert(self.query);
        extensions.insert(self.cookies);
        if let Some(body) = self.body {
            extensions.insert(ParsedBody(body));
        }
        if let Some(time) = self.request_time {
            extensions.insert(time);
        }
        request
    }
}
