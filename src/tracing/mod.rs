//! Trace correlation for requests and the background work they spawn.
//!
//! A [`TraceContext`] is created once per inbound request by the correlation
//! middleware. While the request is being handled it is reachable through a
//! task-local slot, so log lines and audit records can pick it up without
//! threading it through every signature. Task-locals do not follow work onto
//! other tasks: anything handed to the [`BackgroundExecutor`] captures the
//! context explicitly at submission time and re-installs it for the duration of
//! that one job.
//!
//! [`BackgroundExecutor`]: crate::executor::BackgroundExecutor

use axum::http::Request;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tower_http::trace::MakeSpan;
use uuid::Uuid;

// Re-export tracing macros so `crate::tracing::info!` works alongside the crate.
pub use tracing::{debug, error, info, trace, warn};

/// Correlation id shared by every log line and audit record of one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn new(value: impl Into<String>) -> Self {
        TraceId(value.into())
    }

    /// Fresh random id.
    pub fn generate() -> Self {
        TraceId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What gets captured at a hand-off point and restored on the other side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub user_id: Option<String>,
}

impl TraceContext {
    pub fn new(trace_id: TraceId) -> Self {
        Self {
            trace_id,
            user_id: None,
        }
    }

    pub fn generate() -> Self {
        Self::new(TraceId::generate())
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Context installed on the current task, if any.
    pub fn current() -> Option<Self> {
        CURRENT_TRACE.try_with(|ctx| ctx.clone()).ok()
    }

    /// Current context, or a fresh one for work that starts outside a request
    /// (startup jobs, tests).
    pub fn current_or_generate() -> Self {
        Self::current().unwrap_or_else(Self::generate)
    }
}

tokio::task_local! {
    static CURRENT_TRACE: TraceContext;
}

/// Runs `future` with `ctx` installed as the task's trace context. The slot is
/// restored to its previous state when the future completes or is dropped.
pub async fn scope_trace<Fut, R>(ctx: TraceContext, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_TRACE.scope(ctx, future).await
}

pub fn current_trace_id() -> Option<TraceId> {
    CURRENT_TRACE.try_with(|ctx| ctx.trace_id.clone()).ok()
}

/// Span factory for `TraceLayer`, tagging each request span with its trace id.
#[derive(Clone, Default)]
pub struct TraceSpanMaker;

impl<B> MakeSpan<B> for TraceSpanMaker {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let trace_id = request
            .extensions()
            .get::<TraceContext>()
            .map(|ctx| ctx.trace_id.to_string())
            .unwrap_or_default();

        tracing::info_span!(
            "http.request",
            trace_id = %trace_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}
