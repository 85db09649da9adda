//! Error handling and classification module
//!
//! Every failure a request can hit is a [`RawFailure`]. The [`ErrorSink`] is
//! the single place those failures become responses: it records the failure,
//! classifies it in production (see [`classify`]) and hands the
//! [`NormalizedError`] to the [`Responder`].

pub mod classification;
pub mod detector;
pub mod failure;
pub mod responder;
pub mod sink;

// Re-export main types for convenient access
pub use classification::{classify, ErrorStatus, NormalizedError};
pub use failure::{
    AppError, ErrorKind, FailureSlot, FieldError, RawFailure, Unclassified,
    GENERIC_FAILURE_MESSAGE,
};
pub use responder::{Audience, BasicErrorPage, ErrorPage, RequestContext, Responder};
pub use sink::{DiagnosticsLog, ErrorSink, TracingDiagnostics};
