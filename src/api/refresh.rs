//! `POST /refresh`, `GET /refresh/status`, and the per-job endpoints
//! (`/jobs/:id/status`, `/jobs/:id/log`, `/jobs/:id/progress/stream`)
//! from spec §6, thin wrappers over the job engine (§4.11).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::api::error::ApiError;
use crate::core::error::CoreError;
use crate::core::types::{JobRecord, RefreshRequest, RefreshResponse};
use crate::core::AppState;

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<(StatusCode, Json<RefreshResponse>), ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError(CoreError::invalid("query must not be empty")));
    }
    let (job, created, deduplicated) = state
        .job_engine
        .enqueue(&request.query, request.use_llm.unwrap_or(false), request.model.clone())
        .await;
    Ok((
        StatusCode::ACCEPTED,
        Json(RefreshResponse {
            job_id: job.id,
            created,
            deduplicated: if deduplicated { Some(true) } else { None },
            status: job.state.as_str().to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RefreshStatusQuery {
    pub job_id: Option<String>,
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshStatusResponse {
    pub job: Option<JobRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<JobRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent: Option<Vec<JobRecord>>,
}

pub async fn refresh_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefreshStatusQuery>,
) -> Json<RefreshStatusResponse> {
    if let Some(job_id) = params.job_id.as_deref() {
        let job = state.job_engine.status_by_id_any(job_id).await;
        return Json(RefreshStatusResponse { job, active: None, recent: None });
    }
    if let Some(query) = params.query.as_deref() {
        let job = state.job_engine.status_by_query_any(query).await;
        return Json(RefreshStatusResponse { job, active: None, recent: None });
    }
    Json(RefreshStatusResponse {
        job: None,
        active: Some(state.job_engine.active_jobs()),
        recent: Some(state.job_engine.recent_jobs().await),
    })
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .job_engine
        .status_by_id_any(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(CoreError::not_found(format!("no such job: {job_id}"))))
}

pub async fn job_log(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.job_engine.log_path(&job_id);
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| ApiError(CoreError::not_found(format!("no log for job: {job_id}"))))?;
    Ok(([(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")], contents))
}

pub async fn job_progress_stream(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.job_engine.subscribe(&job_id);
    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(Event::default()
            .event("stage")
            .json_data(event)
            .unwrap_or_else(|_| Event::default().event("stage").data("{}")))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
