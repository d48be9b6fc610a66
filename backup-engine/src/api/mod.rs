//! HTTP API for remote monitoring of backup state.

pub mod health;

use crate::service::BackupService;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// How often connected WebSocket clients receive the state map
pub const STATE_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BackupService>,
    pub push_interval: Duration,
}

impl AppState {
    pub fn new(service: Arc<BackupService>) -> Self {
        Self {
            service,
            push_interval: STATE_PUSH_INTERVAL,
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/states", get(states))
        .route("/ws", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /states - every known backup state keyed by name order
async fn states(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.states())
}

/// Serve the monitor on `port` until `shutdown` fires
pub async fn serve(state: AppState, port: u16, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Remote monitor listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
