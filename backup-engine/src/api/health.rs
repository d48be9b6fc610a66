//! Health check endpoints.

use super::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    START_TIME.get().map_or(0, |start| start.elapsed().as_secs())
}

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let active_jobs = state.service.registry().running_count().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime_secs(),
        "active_jobs": active_jobs,
    }))
}

/// GET /version - Version information endpoint
pub async fn version() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "build": if cfg!(debug_assertions) { "dev" } else { "release" },
        "encryption": "external",
    }))
}
