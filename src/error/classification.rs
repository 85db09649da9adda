//! Error classification
//!
//! Maps a [`RawFailure`] onto the small set of externally visible error shapes.
//! Classification is pure: the same raw failure always yields the same
//! [`NormalizedError`].

use serde::Serialize;

use super::detector::first_quoted_value;
use super::failure::{RawFailure, Unclassified, GENERIC_FAILURE_MESSAGE};

/// Client-facing status word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    /// The client sent something wrong (status code below 500).
    Fail,
    /// The server failed.
    Error,
}

impl ErrorStatus {
    pub fn from_status_code(status_code: u16) -> Self {
        if status_code < 500 {
            ErrorStatus::Fail
        } else {
            ErrorStatus::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Fail => "fail",
            ErrorStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A failure reduced to what the responder needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedError {
    message: String,
    status_code: u16,
    status: ErrorStatus,
    is_operational: bool,
}

impl NormalizedError {
    /// Operational error; status derived from the code.
    pub fn operational(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code,
            status: ErrorStatus::from_status_code(status_code),
            is_operational: true,
        }
    }

    /// The generic 500 for faults nothing knows about.
    pub fn unexpected() -> Self {
        Self {
            message: GENERIC_FAILURE_MESSAGE.to_string(),
            status_code: 500,
            status: ErrorStatus::Error,
            is_operational: false,
        }
    }

    /// The raw failure as-is, with missing fields default-filled.
    ///
    /// Status code defaults to 500, status to `error`, message to the generic
    /// fallback, operational flag to `false`. No reclassification happens.
    pub fn verbatim(raw: &RawFailure) -> Self {
        let message = raw.to_string();
        Self {
            message: if message.is_empty() {
                GENERIC_FAILURE_MESSAGE.to_string()
            } else {
                message
            },
            status_code: raw.status_code().unwrap_or(500),
            status: raw.status().unwrap_or(ErrorStatus::Error),
            is_operational: raw.is_operational().unwrap_or(false),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn is_operational(&self) -> bool {
        self.is_operational
    }
}

impl std::fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for NormalizedError {}

/// Classify a raw failure.
pub fn classify(raw: &RawFailure) -> NormalizedError {
    match raw {
        RawFailure::Cast { path, value, .. } => {
            NormalizedError::operational(format!("Invalid {}: {}", path, value), 400)
        }
        RawFailure::DuplicateKey { errmsg, .. } => {
            let message = match first_quoted_value(errmsg) {
                Some(value) => format!(
                    "Duplicate field value: {}. Please use another value",
                    value
                ),
                None => "Duplicate field value. Please use another value".to_string(),
            };
            NormalizedError::operational(message, 400)
        }
        RawFailure::Validation { errors } => {
            let joined = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join(". ");
            NormalizedError::operational(format!("Invalid input data. {}", joined), 400)
        }
        RawFailure::TokenMalformed { .. } => {
            NormalizedError::operational("Invalid Token, please login again", 401)
        }
        RawFailure::TokenExpired { .. } => {
            NormalizedError::operational("Your session has expired, please login again", 401)
        }
        RawFailure::PayloadTooLarge { limit } => NormalizedError::operational(
            format!("Request body is larger than the {} byte limit", limit),
            413,
        ),
        RawFailure::App(app) => NormalizedError {
            message: app.message.clone(),
            status_code: app.status_code,
            status: app.status,
            is_operational: app.is_operational,
        },
        RawFailure::Unclassified(unclassified) => classify_unclassified(unclassified),
    }
}

fn classify_unclassified(failure: &Unclassified) -> NormalizedError {
    match (failure.status_code, failure.is_operational) {
        (Some(status_code), Some(is_operational)) => NormalizedError {
            message: failure
                .message
                .clone()
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
            status_code,
            status: ErrorStatus::from_status_code(status_code),
            is_operational,
        },
        _ => NormalizedError::unexpected(),
    }
}
