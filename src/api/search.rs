//! `GET /search` (spec §6/§4.12).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::core::error::CoreError;
use crate::core::types::SearchResponse;
use crate::core::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
    pub llm: Option<String>,
    pub model: Option<String>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    if params.q.trim().is_empty() {
        return Err(ApiError(CoreError::invalid("q must not be empty")));
    }
    let limit = params.limit.unwrap_or(10);
    let use_llm = params.llm.as_deref().map(|v| v.eq_ignore_ascii_case("on")).unwrap_or(false);
    let response = state
        .search_service
        .run_query(&params.q, limit, use_llm, params.model)
        .await;
    Ok(Json(response))
}
