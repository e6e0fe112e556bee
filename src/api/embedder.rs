//! `GET /embedder/status`, `POST /embedder/ensure` (spec §6/§4.4).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;

use crate::core::types::EmbedderStatus;
use crate::core::AppState;

pub async fn embedder_status(State(state): State<Arc<AppState>>) -> Json<EmbedderStatus> {
    Json(state.embedder.status().await)
}

#[derive(Debug, Default, Deserialize)]
pub struct EmbedderEnsureRequest {
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn embedder_ensure(
    State(state): State<Arc<AppState>>,
    body: Option<Json<EmbedderEnsureRequest>>,
) -> Json<EmbedderStatus> {
    let model = body.and_then(|Json(r)| r.model);
    Json(state.embedder.ensure(model).await)
}
