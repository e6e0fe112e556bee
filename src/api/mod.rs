//! Axum HTTP surface (spec §6): thin handlers over `AppState`, no business
//! logic of their own. Mirrors the teacher's flat `Router::new().route(...)`
//! bootstrap in `main.rs`.

pub mod embedder;
pub mod error;
pub mod index;
pub mod refresh;
pub mod search;

use std::sync::Arc;

use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/refresh", post(refresh::refresh))
        .route("/refresh/status", get(refresh::refresh_status))
        .route("/jobs/{id}/status", get(refresh::job_status))
        .route("/jobs/{id}/log", get(refresh::job_log))
        .route("/jobs/{id}/progress/stream", get(refresh::job_progress_stream))
        .route("/search", get(search::search))
        .route("/index/search", post(index::index_search))
        .route("/index/upsert", post(index::index_upsert))
        .route("/embedder/status", get(embedder::embedder_status))
        .route("/embedder/ensure", post(embedder::embedder_ensure))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "focusengine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
