//! Trace id middleware.
//!
//! Installed as the outermost layer of the router, so nothing runs before the
//! request has a trace id. Every request gets a fresh id; inbound headers are
//! not trusted.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{info_span, Instrument};

use crate::tracing::{scope_trace, TraceContext};

/// Header carrying the trace id on every response.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

pub async fn trace_id_middleware(mut request: Request, next: Next) -> Response {
    let ctx = TraceContext::generate();

    // Handlers can also pull it explicitly via Extension<TraceContext>
    request.extensions_mut().insert(ctx.clone());

    let span = info_span!(
        "request",
        trace_id = %ctx.trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = scope_trace(ctx.clone(), next.run(request))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(ctx.trace_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn echo_trace(Extension(ctx): Extension<TraceContext>) -> (StatusCode, String) {
        let scoped = crate::tracing::current_trace_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        (StatusCode::OK, format!("{}|{}", ctx.trace_id, scoped))
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo_trace))
            .layer(axum::middleware::from_fn(trace_id_middleware))
    }

    #[tokio::test]
    async fn header_matches_handler_context() {
        let response = app()
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body, format!("{}|{}", header, header));
    }

    #[tokio::test]
    async fn inbound_header_is_ignored() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/")
                    .header(TRACE_ID_HEADER, "caller-chosen")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response.headers().get(TRACE_ID_HEADER).unwrap();
        assert_ne!(header, "caller-chosen");
    }
}
