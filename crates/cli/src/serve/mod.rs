//! `stepwise serve`: HTTP JSON API over the execution engine.
//!
//! Public endpoints (no authentication; the visitor is identified by the
//! `X-Session-Id` header or a `session_id` field):
//! - GET  /public/processes/{slug}
//! - POST /public/processes/{slug}/verify-password
//! - POST /public/processes/{slug}/views
//! - POST /public/processes/{slug}/start
//! - GET  /public/processes/{slug}/progress/{session_id}
//! - GET  /public/processes/{slug}/progress/{session_id}/current-step
//! - POST /public/processes/{slug}/progress/{session_id}/next
//! - POST /public/processes/{slug}/progress/{session_id}/previous
//! - GET  /public/processes/{slug}/steps/{step_id}/form
//! - POST /public/processes/{slug}/steps/{step_id}/complete
//! - POST /public/processes/{slug}/complete
//!
//! Owner endpoints (`X-Owner-Id` header, plus the API key when
//! `STEPWISE_API_KEY` is set):
//! - POST /owner/processes/{slug}/steps/reorder
//! - POST /owner/processes/{slug}/steps/{step_id}/move
//! - GET  /owner/processes/{slug}/progress
//!
//! GET /health is always open. Every route sits behind the per-IP rate
//! limiter and a permissive CORS layer.

mod handlers;
mod middleware;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use stepwise_core::OwnerId;
use stepwise_engine::{AccessGate, ExecutionService, ProcessManager, TracingObserver};
use stepwise_sqlite::SqliteStorage;
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_advance, handle_complete_process, handle_complete_step, handle_current_step,
    handle_health, handle_list_progress, handle_move_step, handle_not_found, handle_progress,
    handle_reorder, handle_retreat, handle_start, handle_step_form, handle_structure,
    handle_track_view, handle_verify_password,
};
use self::middleware::{owner_auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use crate::config::Settings;
use crate::definitions;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Rate limit window.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// How often expired access grants are swept out.
const GRANT_PURGE_INTERVAL: Duration = Duration::from_secs(300);

pub(crate) struct ServeOptions {
    pub(crate) port: u16,
    pub(crate) definitions: Option<PathBuf>,
    pub(crate) owner: String,
    pub(crate) settings: Settings,
}

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Build the shared state, preloading `options.definitions` if given.
pub(crate) async fn build_state(
    storage: SqliteStorage,
    options: &ServeOptions,
) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let storage = Arc::new(storage);
    let engine = &options.settings.engine;
    let service = ExecutionService::new(storage.clone(), engine.clone())?
        .with_observer(Arc::new(TracingObserver));
    let manager = ProcessManager::new(storage, engine)?;

    if let Some(path) = &options.definitions {
        let file = definitions::load(path)?;
        let report = definitions::seed(&manager, &OwnerId::new(options.owner.as_str()), file).await?;
        tracing::info!(
            path = %path.display(),
            processes = report.processes.len(),
            steps = report.steps,
            "loaded definitions"
        );
    }

    let gate = AccessGate::for_service(&service);
    Ok(Arc::new(AppState {
        service: Arc::new(service),
        manager,
        gate,
        rate_limiter: RateLimiter::new(options.settings.rate_limit, RATE_LIMIT_WINDOW),
        api_key: options.settings.api_key.clone(),
        trust_proxy: options.settings.trust_proxy,
    }))
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let public = Router::new()
        .route("/{slug}", get(handle_structure))
        .route("/{slug}/verify-password", post(handle_verify_password))
        .route("/{slug}/views", post(handle_track_view))
        .route("/{slug}/start", post(handle_start))
        .route("/{slug}/progress/{session_id}", get(handle_progress))
        .route(
            "/{slug}/progress/{session_id}/current-step",
            get(handle_current_step),
        )
        .route("/{slug}/progress/{session_id}/next", post(handle_advance))
        .route("/{slug}/progress/{session_id}/previous", post(handle_retreat))
        .route("/{slug}/steps/{step_id}/form", get(handle_step_form))
        .route("/{slug}/steps/{step_id}/complete", post(handle_complete_step))
        .route("/{slug}/complete", post(handle_complete_process));

    let owner = Router::new()
        .route("/{slug}/steps/reorder", post(handle_reorder))
        .route("/{slug}/steps/{step_id}/move", post(handle_move_step))
        .route("/{slug}/progress", get(handle_list_progress));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/public/processes", public)
        .nest("/owner/processes", owner)
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            owner_auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server on `options.port`.
///
/// - CORS: any origin, GET and POST.
/// - Rate limit: per IP, `STEPWISE_RATE_LIMIT` requests per minute.
/// - API key: with `STEPWISE_API_KEY` set, owner routes require it.
pub(crate) async fn start_server(
    storage: SqliteStorage,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = build_state(storage, &options).await?;
    if state.api_key.is_some() {
        tracing::info!("API key authentication enabled for owner routes");
    }
    tracing::info!(
        rate_limit = options.settings.rate_limit,
        "rate limit per IP per minute"
    );

    tokio::spawn(purge_grants(state.clone()));

    let app = router(state);
    let addr = format!("0.0.0.0:{}", options.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "stepwise listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Drop expired grants left by visitors that never came back.
async fn purge_grants(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(GRANT_PURGE_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let purged = state.gate.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired access grants purged");
        }
    }
}

/// Wait for Ctrl+C. Without a signal handler the server runs until killed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
