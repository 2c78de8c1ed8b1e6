use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use session::decode_request_bytes;
use shared::{error::ApiError, protocol::SessionSnapshot};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod hub;
mod stream;
mod ws;

use app_state::AppState;
use config::load_settings;
use hub::SessionHub;

const MAX_EVENT_BODY_BYTES: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    let hub = SessionHub::new(settings.broadcast_style, settings.broadcast_capacity);
    let state = AppState {
        hub: Arc::new(hub),
        resync_interval: settings.resync_interval(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, style = ?settings.broadcast_style, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws::ws_handler))
        .route("/session", get(http_session_snapshot))
        .route("/session/events", post(http_session_event))
        .route("/session/stream", get(stream::session_stream))
        .layer(RequestBodyLimitLayer::new(MAX_EVENT_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_session_snapshot(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.hub.snapshot().await)
}

/// Applies one event and answers with the session as it stands afterwards.
async fn http_session_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionSnapshot>, (StatusCode, Json<ApiError>)> {
    let request = decode_request_bytes(&body).map_err(reject)?;
    let outcome = state.hub.dispatch(request).await.map_err(reject)?;
    Ok(Json(outcome.snapshot))
}

fn reject(error: ApiError) -> (StatusCode, Json<ApiError>) {
    warn!(code = ?error.code, message = %error.message, "rejected http request");
    (StatusCode::BAD_REQUEST, Json(error))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
