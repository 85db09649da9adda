//! Centralized error sink
//!
//! The single exit point for every failure: policy stages, the dispatcher's
//! not-found fallback and route handlers all end up here.

use std::sync::Arc;

use axum::response::Response;

use super::classification::{classify, NormalizedError};
use super::failure::RawFailure;
use super::responder::{RequestContext, Responder};

/// Records every failure before it is translated.
pub trait DiagnosticsLog: Send + Sync {
    fn record(&self, failure: &RawFailure, stack: &str);
}

/// Writes failures to the `natours::diagnostics` tracing target.
#[derive(Debug, Clone, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsLog for TracingDiagnostics {
    fn record(&self, failure: &RawFailure, stack: &str) {
        tracing::error!(
            target: "natours::diagnostics",
            kind = ?failure.kind(),
            name = failure.name(),
            "{}",
            stack
        );
    }
}

/// Logs, classifies (production only) and responds.
#[derive(Clone)]
pub struct ErrorSink {
    responder: Responder,
    diagnostics: Arc<dyn DiagnosticsLog>,
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new(Responder::default(), Arc::new(TracingDiagnostics))
    }
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink")
            .field("responder", &self.responder)
            .finish_non_exhaustive()
    }
}

impl ErrorSink {
    pub fn new(responder: Responder, diagnostics: Arc<dyn DiagnosticsLog>) -> Self {
        Self {
            responder,
            diagnostics,
        }
    }

    /// Translate `raw` into the response for this request.
    ///
    /// Development renders the failure verbatim (defaults filled in);
    /// production classifies it first.
    pub fn handle(&self, raw: RawFailure, ctx: &RequestContext) -> Response {
        self.diagnostics.record(&raw, &raw.stack());

        let normalized = if ctx.mode.is_production() {
            classify(&raw)
        } else {
            NormalizedError::verbatim(&raw)
        };

        self.responder.respond(&normalized, &raw, ctx)
    }
}
