//! HTTP middleware: rate limiting and owner route authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::state::AppState;

/// Checks the per-IP request rate before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check(addr.ip()).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(ip = %addr.ip(), retry_after, "rate limited");
            let body = serde_json::json!({
                "error": "rate limit exceeded",
                "retry_after": retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

/// API key check for `/owner/` routes.
///
/// When `STEPWISE_API_KEY` is set, owner requests must carry either
/// `Authorization: Bearer <key>` or `X-API-Key: <key>`. Public routes and
/// `/health` are never checked.
pub(crate) async fn owner_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected = match &state.api_key {
        Some(key) if request.uri().path().starts_with("/owner/") => key,
        _ => return next.run(request).await,
    };

    let headers = request.headers();
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()));

    match presented {
        Some(key) if key == expected => next.run(request).await,
        Some(_) => super::json_error(StatusCode::FORBIDDEN, "invalid API key").into_response(),
        None => {
            super::json_error(StatusCode::UNAUTHORIZED, "authentication required").into_response()
        }
    }
}
