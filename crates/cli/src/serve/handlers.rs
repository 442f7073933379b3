//! HTTP route handlers.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use stepwise_core::{JsonMap, OwnerId, ProgressStatus, StepId, SubmissionId};
use stepwise_engine::EngineError;

use super::json_error;
use super::state::AppState;

const SESSION_HEADER: &str = "x-session-id";
const OWNER_HEADER: &str = "x-owner-id";

/// An engine error rendered as `{"error", "kind"}` with its status code.
pub(crate) struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        let body = serde_json::json!({ "error": message, "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(EngineError::validation(message))
}

/// Parse an optional JSON body; an empty body yields the default.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid JSON body: {e}")))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The visitor's session: an explicit field wins over the header.
fn session_from(headers: &HeaderMap, field: Option<String>) -> Option<String> {
    field
        .filter(|s| !s.trim().is_empty())
        .or_else(|| header(headers, SESSION_HEADER).map(str::to_string))
}

fn new_session() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn parse_step_id(raw: &str) -> Result<StepId, ApiError> {
    StepId::from_str(raw).map_err(|_| ApiError(EngineError::not_found("step")))
}

/// The owner named by the `X-Owner-Id` header.
pub(crate) struct Owner(OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match header(&parts.headers, OWNER_HEADER) {
            Some(owner) => Ok(Owner(OwnerId::new(owner))),
            None => Err(
                json_error(StatusCode::UNAUTHORIZED, "X-Owner-Id header is required")
                    .into_response(),
            ),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SessionBody {
    #[serde(default)]
    session_id: Option<String>,
}

// ── Service ──────────────────────────────────────────────────────────────────

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

// ── Public ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VisitorQuery {
    #[serde(default)]
    session_id: Option<String>,
}

/// GET /public/processes/{slug}
pub(crate) async fn handle_structure(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<VisitorQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let structure = match session_from(&headers, query.session_id) {
        Some(visitor) => state.gate.structure(&state.service, &visitor, &slug).await?,
        None => state.service.get_structure(&slug, false).await?,
    };
    Ok(Json(structure).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VerifyBody {
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /public/processes/{slug}/verify-password
///
/// On success the visitor (returned as `session_id`) may read the full
/// structure until the grant expires.
pub(crate) async fn handle_verify_password(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let body: VerifyBody = parse_body(&body)?;
    let password = match body.password.filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => return Err(bad_request("Password is required")),
    };
    let visitor = session_from(&headers, body.session_id).unwrap_or_else(new_session);

    if state
        .gate
        .unlock(&state.service, &visitor, &slug, &password)
        .await?
    {
        let response = serde_json::json!({
            "message": "Password verified successfully",
            "access_granted": true,
            "session_id": visitor,
        });
        Ok((StatusCode::OK, Json(response)).into_response())
    } else {
        let response = serde_json::json!({
            "error": EngineError::InvalidPassword.to_string(),
            "kind": EngineError::InvalidPassword.kind(),
            "access_granted": false,
        });
        Ok((StatusCode::UNAUTHORIZED, Json(response)).into_response())
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ViewBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    metadata: JsonMap,
}

/// The peer address, or the first `X-Forwarded-For` hop when the server
/// sits behind a trusted proxy.
fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> String {
    trust_proxy
        .then(|| header(headers, "x-forwarded-for"))
        .flatten()
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| peer.ip().to_string(), str::to_string)
}

/// POST /public/processes/{slug}/views
pub(crate) async fn handle_track_view(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let body: ViewBody = parse_body(&body)?;
    let session = session_from(&headers, body.session_id).unwrap_or_else(new_session);
    let ip = client_ip(&headers, addr, state.trust_proxy);

    let mut metadata = body.metadata;
    for (key, name) in [("user_agent", "user-agent"), ("referer", "referer")] {
        if let Some(value) = header(&headers, name) {
            metadata
                .entry(key)
                .or_insert_with(|| serde_json::Value::from(value));
        }
    }

    let view_id = state
        .service
        .track_view(&slug, &session, Some(ip), metadata)
        .await?;
    let message = match view_id {
        Some(_) => "View tracked successfully",
        None => "View not recorded",
    };
    let response = serde_json::json!({
        "message": message,
        "view_id": view_id,
        "session_id": session,
    });
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// POST /public/processes/{slug}/start
///
/// 201 with a new run, 200 when the session already has one.
pub(crate) async fn handle_start(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let body: SessionBody = parse_body(&body)?;
    let session = session_from(&headers, body.session_id).unwrap_or_else(new_session);
    let outcome = state.service.start(&slug, &session, None).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)).into_response())
}

/// GET /public/processes/{slug}/progress/{session_id}
pub(crate) async fn handle_progress(
    State(state): State<Arc<AppState>>,
    Path((slug, session_id)): Path<(String, String)>,
) -> ApiResult {
    let view = state.service.get_progress(&slug, &session_id).await?;
    Ok(Json(view).into_response())
}

/// GET /public/processes/{slug}/progress/{session_id}/current-step
pub(crate) async fn handle_current_step(
    State(state): State<Arc<AppState>>,
    Path((slug, session_id)): Path<(String, String)>,
) -> ApiResult {
    let step = state.service.get_current_step(&slug, &session_id).await?;
    Ok(Json(step).into_response())
}

/// POST /public/processes/{slug}/progress/{session_id}/next
pub(crate) async fn handle_advance(
    State(state): State<Arc<AppState>>,
    Path((slug, session_id)): Path<(String, String)>,
) -> ApiResult {
    let view = state.service.advance(&slug, &session_id).await?;
    Ok(Json(view).into_response())
}

/// POST /public/processes/{slug}/progress/{session_id}/previous
pub(crate) async fn handle_retreat(
    State(state): State<Arc<AppState>>,
    Path((slug, session_id)): Path<(String, String)>,
) -> ApiResult {
    let view = state.service.retreat(&slug, &session_id).await?;
    Ok(Json(view).into_response())
}

/// GET /public/processes/{slug}/steps/{step_id}/form
pub(crate) async fn handle_step_form(
    State(state): State<Arc<AppState>>,
    Path((slug, step_id)): Path<(String, String)>,
) -> ApiResult {
    let step_id = parse_step_id(&step_id)?;
    let form = state.service.get_step_form(&slug, step_id).await?;
    Ok(Json(form).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CompleteStepBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    submission_id: Option<SubmissionId>,
}

/// POST /public/processes/{slug}/steps/{step_id}/complete
pub(crate) async fn handle_complete_step(
    State(state): State<Arc<AppState>>,
    Path((slug, step_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let step_id = parse_step_id(&step_id)?;
    let body: CompleteStepBody = parse_body(&body)?;
    let session = session_from(&headers, body.session_id)
        .ok_or_else(|| bad_request("session_id is required"))?;
    let outcome = state
        .service
        .complete_step(&slug, step_id, &session, body.submission_id)
        .await?;
    Ok(Json(outcome).into_response())
}

/// POST /public/processes/{slug}/complete
pub(crate) async fn handle_complete_process(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let body: SessionBody = parse_body(&body)?;
    let session = session_from(&headers, body.session_id)
        .ok_or_else(|| bad_request("session_id is required"))?;
    let outcome = state.service.complete_process(&slug, &session).await?;
    Ok(Json(outcome).into_response())
}

// ── Owner ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ReorderBody {
    order: Vec<StepId>,
}

/// POST /owner/processes/{slug}/steps/reorder
pub(crate) async fn handle_reorder(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(slug): Path<String>,
    Json(body): Json<ReorderBody>,
) -> ApiResult {
    let steps = state
        .manager
        .reorder_steps(&owner, &slug, &body.order)
        .await?;
    Ok(Json(serde_json::json!({ "steps": steps })).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct MoveBody {
    target: u32,
}

/// POST /owner/processes/{slug}/steps/{step_id}/move
pub(crate) async fn handle_move_step(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path((slug, step_id)): Path<(String, String)>,
    Json(body): Json<MoveBody>,
) -> ApiResult {
    let step_id = parse_step_id(&step_id)?;
    let steps = state
        .manager
        .move_step(&owner, &slug, step_id, body.target)
        .await?;
    Ok(Json(serde_json::json!({ "steps": steps })).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProgressQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// GET /owner/processes/{slug}/progress?status=&limit=
pub(crate) async fn handle_list_progress(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Path(slug): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> ApiResult {
    let status = query
        .status
        .as_deref()
        .map(ProgressStatus::from_str)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;
    let runs = state
        .manager
        .list_progress(&owner, &slug, status, query.limit.unwrap_or(0))
        .await?;
    Ok(Json(serde_json::json!({ "count": runs.len(), "progress": runs })).into_response())
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use axum::http::{HeaderMap, HeaderValue};

    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(198, 51, 100, 4), 50123))
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn forwarded_for_is_ignored_without_a_trusted_proxy() {
        let headers = forwarded("203.0.113.9");
        assert_eq!(client_ip(&headers, peer(), false), "198.51.100.4");
    }

    #[test]
    fn trusted_proxy_supplies_the_first_hop() {
        let headers = forwarded(" 203.0.113.9 , 10.0.0.1");
        assert_eq!(client_ip(&headers, peer(), true), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new(), peer(), true), "198.51.100.4");
        assert_eq!(client_ip(&forwarded(""), peer(), true), "198.51.100.4");
    }
}
