//! Whole-request deadline answered with the JSON error body

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use ekip_common::{AppError, Result};
use std::time::Duration;

/// Fail with `504 TIMEOUT` when the inner service runs past `limit`
pub async fn enforce_deadline(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let path = request.uri().path().to_string();
    tokio::time::timeout(limit, next.run(request))
        .await
        .map_err(|_| {
            tracing::warn!(path = %path, timeout_ms = limit.as_millis() as u64, "Request deadline exceeded");
            AppError::Timeout {
                operation: "request".to_string(),
                timeout_ms: limit.as_millis() as u64,
            }
        })
}
