//! Start/success/error logging around async operations.
//!
//! Every traced operation gets a span id; operations that share a trace id
//! belong to the same request. Events go through `tracing`, so whichever
//! subscriber the binary installs decides the output format.

use std::fmt::{Debug, Display};
use std::future::Future;

use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Identifies one traced operation within a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Starts a new trace.
    pub fn root() -> Self {
        Self::with_trace_id(Uuid::new_v4().simple().to_string())
    }

    /// Joins an existing trace, e.g. one propagated from a request header.
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// Creates a context for a nested operation.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }
}

fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Runs `f` under `ctx`, logging start, then success or error with the
/// elapsed time. The error is returned unchanged.
pub async fn trace_operation<F, Fut, T, E>(
    operation: &str,
    ctx: &TraceContext,
    f: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + Debug,
{
    let span = tracing::info_span!(
        "operation",
        operation,
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        parent_span_id = ctx.parent_span_id.as_deref().unwrap_or(""),
    );

    async move {
        let started = Instant::now();
        tracing::info!(event = "start", "operation started");

        let result = f().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => tracing::info!(event = "success", duration_ms, "operation succeeded"),
            Err(err) => tracing::error!(
                event = "error",
                duration_ms,
                error = %err,
                detail = ?err,
                "operation failed"
            ),
        }
        result
    }
    .instrument(span)
    .await
}
