//! Raw failures as they surface from stages, handlers and collaborators.
//!
//! Every failure the pipeline can observe is one variant of [`RawFailure`].
//! Known upstream kinds (persistence cast/duplicate/validation errors, token
//! verifier errors, body limits) carry exactly the fields the classifier needs;
//! anything else is [`RawFailure::Unclassified`].

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::classification::ErrorStatus;

/// Fallback message when a failure carries none.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong please try again later";

/// Externally visible error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ValidationFailure,
    UniquenessViolation,
    TypeCoercionFailure,
    AuthTokenMalformed,
    AuthTokenExpired,
    NotFound,
    RateLimitExceeded,
    PayloadTooLarge,
    Unclassified,
}

/// One failing field of a multi-field validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A failure constructed deliberately by application code.
///
/// Carries its own status code and is always operational unless built with
/// [`AppError::internal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppError {
    pub message: String,
    pub status_code: u16,
    pub status: ErrorStatus,
    pub is_operational: bool,
}

impl AppError {
    /// An anticipated, user-facing failure.
    pub fn new(message: impl Into<String>, status_code: StatusCode) -> Self {
        Self {
            message: message.into(),
            status_code: status_code.as_u16(),
            status: ErrorStatus::from_status_code(status_code.as_u16()),
            is_operational: true,
        }
    }

    /// A failure application code knows to be a fault, never shown verbatim in production.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            status: ErrorStatus::Error,
            is_operational: false,
        }
    }

    /// The dispatcher's "no route" failure for the original request target.
    pub fn not_found(target: &str) -> Self {
        Self::new(
            format!("Can't find {} on this server", target),
            StatusCode::NOT_FOUND,
        )
    }
}

/// An arbitrary fault the pipeline has no specific knowledge of.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unclassified {
    pub message: Option<String>,
    pub status_code: Option<u16>,
    pub is_operational: Option<bool>,
    #[serde(skip)]
    pub source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl PartialEq for Unclassified {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
            && self.status_code == other.status_code
            && self.is_operational == other.is_operational
            && self.source.as_ref().map(|s| s.to_string())
                == other.source.as_ref().map(|s| s.to_string())
    }
}

impl Eq for Unclassified {}

/// A heterogeneous upstream failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "name")]
pub enum RawFailure {
    /// A value could not be coerced to the type of a typed field.
    #[error("Cast to {expected} failed for value \"{value}\" at path \"{path}\"")]
    #[serde(rename = "CastError")]
    Cast {
        path: String,
        value: String,
        expected: String,
    },

    /// A uniqueness constraint rejected a write.
    #[error("{errmsg}")]
    #[serde(rename = "MongoServerError")]
    DuplicateKey { code: u32, errmsg: String },

    /// One or more fields failed validation.
    #[error("Validation failed: {}", summarize_fields(.errors))]
    #[serde(rename = "ValidationError")]
    Validation { errors: Vec<FieldError> },

    /// The session token could not be decoded or its signature is wrong.
    #[error("{reason}")]
    #[serde(rename = "JsonWebTokenError")]
    TokenMalformed { reason: String },

    /// The session token was valid but is past its expiry.
    #[error("jwt expired")]
    #[serde(rename = "TokenExpiredError", rename_all = "camelCase")]
    TokenExpired { expired_at: Option<DateTime<Utc>> },

    /// A buffered body exceeded the configured ceiling.
    #[error("request entity too large (limit {limit} bytes)")]
    #[serde(rename = "PayloadTooLargeError")]
    PayloadTooLarge { limit: usize },

    /// A failure shaped by application code.
    #[error("{}", .0.message)]
    #[serde(rename = "AppError")]
    App(AppError),

    /// Anything else.
    #[error("{}", .0.message.as_deref().unwrap_or(GENERIC_FAILURE_MESSAGE))]
    #[serde(rename = "Error")]
    Unclassified(Unclassified),
}

fn summarize_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.path, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl RawFailure {
    /// Duplicate-key error code raised by the persistence engine.
    pub const DUPLICATE_KEY_CODE: u32 = 11000;

    pub fn cast(
        path: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        RawFailure::Cast {
            path: path.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    pub fn duplicate_key(errmsg: impl Into<String>) -> Self {
        RawFailure::DuplicateKey {
            code: Self::DUPLICATE_KEY_CODE,
            errmsg: errmsg.into(),
        }
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        RawFailure::Validation { errors }
    }

    pub fn token_malformed(reason: impl Into<String>) -> Self {
        RawFailure::TokenMalformed {
            reason: reason.into(),
        }
    }

    pub fn token_expired(expired_at: Option<DateTime<Utc>>) -> Self {
        RawFailure::TokenExpired { expired_at }
    }

    pub fn not_found(target: &str) -> Self {
        RawFailure::App(AppError::not_found(target))
    }

    /// Wrap an arbitrary error as an unclassified fault.
    pub fn unexpected<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        RawFailure::Unclassified(Unclassified {
            message: Some(error.to_string()),
            source: Some(Arc::new(error)),
            ..Unclassified::default()
        })
    }

    /// An unclassified fault with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        RawFailure::Unclassified(Unclassified {
            message: Some(message.into()),
            ..Unclassified::default()
        })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RawFailure::Cast { .. } => ErrorKind::TypeCoercionFailure,
            RawFailure::DuplicateKey { .. } => ErrorKind::UniquenessViolation,
            RawFailure::Validation { .. } => ErrorKind::ValidationFailure,
            RawFailure::TokenMalformed { .. } => ErrorKind::AuthTokenMalformed,
            RawFailure::TokenExpired { .. } => ErrorKind::AuthTokenExpired,
            RawFailure::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            RawFailure::App(app) => match app.status_code {
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimitExceeded,
                _ => ErrorKind::Unclassified,
            },
            RawFailure::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    /// The name a client sees in the development `error` payload.
    pub fn name(&self) -> &'static str {
        match self {
            RawFailure::Cast { .. } => "CastError",
            RawFailure::DuplicateKey { .. } => "MongoServerError",
            RawFailure::Validation { .. } => "ValidationError",
            RawFailure::TokenMalformed { .. } => "JsonWebTokenError",
            RawFailure::TokenExpired { .. } => "TokenExpiredError",
            RawFailure::PayloadTooLarge { .. } => "PayloadTooLargeError",
            RawFailure::App(_) => "AppError",
            RawFailure::Unclassified(_) => "Error",
        }
    }

    /// Status code the failure declares about itself, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RawFailure::PayloadTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE.as_u16()),
            RawFailure::App(app) => Some(app.status_code),
            RawFailure::Unclassified(u) => u.status_code,
            _ => None,
        }
    }

    /// Status the failure declares about itself, if any.
    pub fn status(&self) -> Option<ErrorStatus> {
        match self {
            RawFailure::App(app) => Some(app.status),
            RawFailure::PayloadTooLarge { .. } => Some(ErrorStatus::Fail),
            _ => None,
        }
    }

    /// Operational flag the failure declares about itself, if any.
    pub fn is_operational(&self) -> Option<bool> {
        match self {
            RawFailure::App(app) => Some(app.is_operational),
            RawFailure::PayloadTooLarge { .. } => Some(true),
            RawFailure::Unclassified(u) => u.is_operational,
            _ => None,
        }
    }

    /// Diagnostic trace: name and message followed by the source chain.
    pub fn stack(&self) -> String {
        let mut out = format!("{}: {}", self.name(), self);
        let mut source: Option<&(dyn StdError + 'static)> = match self {
            RawFailure::Unclassified(u) => u
                .source
                .as_deref()
                .map(|s| s as &(dyn StdError + 'static)),
            _ => None,
        };
        // The first source repeats the message; walk from its cause.
        if let Some(first) = source {
            source = first.source();
        }
        while let Some(cause) = source {
            let _ = write!(out, "\n    caused by: {}", cause);
            source = cause.source();
        }
        out
    }
}

impl From<AppError> for RawFailure {
    fn from(error: AppError) -> Self {
        RawFailure::App(error)
    }
}

/// Carrier placed in response extensions so the chain driver can route a
/// handler's failure to the error sink.
#[derive(Debug, Clone)]
pub struct FailureSlot(pub RawFailure);

impl IntoResponse for RawFailure {
    fn into_response(self) -> Response {
        let status = self
            .status_code()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = status.into_response();
        response.extensions_mut().insert(FailureSlot(self));
        response
    }
}
