//! Per-request Prometheus metrics

use axum::{extract::Request, middleware::Next, response::Response};
use ekip_common::metrics::RequestMetrics;

/// Record count and latency for every request, labelled by route
pub async fn track_requests(request: Request, next: Next) -> Response {
    let tracker = RequestMetrics::start(request.method().as_str(), request.uri().path());
    let response = next.run(request).await;
    tracker.finish(response.status().as_u16());
    response
}
