//! `POST /index/search`, `POST /index/upsert` (spec §6/§4.4): a thin
//! pass-through to the vector store, bypassing the hybrid blend for callers
//! that want raw vector hits or to seed the index directly.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use crate::api::error::ApiError;
use crate::core::error::CoreError;
use crate::core::types::{IndexSearchHit, IndexSearchRequest, IndexUpsertRequest, IndexUpsertResponse};
use crate::core::AppState;
use crate::vector_store::pending::PendingVectorRecord;

#[derive(serde::Serialize)]
pub struct IndexSearchResponse {
    pub results: Vec<IndexSearchHit>,
}

pub async fn index_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IndexSearchRequest>,
) -> Result<Json<IndexSearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError(CoreError::invalid("query must not be empty")));
    }
    let hits = state
        .vector_store
        .search(&request.query, request.k, request.filters.as_ref())
        .await?;
    let results = hits
        .into_iter()
        .map(|(url, title, chunk, score)| IndexSearchHit { url, title, chunk, score })
        .collect();
    Ok(Json(IndexSearchResponse { results }))
}

pub async fn index_upsert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IndexUpsertRequest>,
) -> Result<Json<IndexUpsertResponse>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError(CoreError::invalid("text must not be empty")));
    }
    let response = state
        .vector_store
        .upsert_document(
            &request.text,
            request.url.as_deref(),
            request.title.as_deref(),
            request.meta.as_ref(),
        )
        .await?;

    if response.queued {
        let now = chrono::Utc::now().timestamp();
        let chunks = crate::vector_store::chunk_text(&request.text);
        let chunks_json = serde_json::to_string(
            &chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>(),
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let title = request.title.clone().unwrap_or_default();
        state.pending_queue.enqueue(&PendingVectorRecord {
            doc_id: response.doc_id.clone(),
            job_id: None,
            url: request.url.clone(),
            title: title.clone(),
            resolved_title: title,
            content_hash: crate::fingerprint::content_hash_hex("", "", &request.text),
            simhash: crate::fingerprint::simhash64(&request.text).to_string(),
            metadata: request
                .meta
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default())
                .unwrap_or_default(),
            chunks_json,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        })?;
    }

    Ok(Json(response))
}
