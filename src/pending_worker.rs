//! Pending-Vector Worker (C12): background drainer loop, exponential
//! backoff on failure, per spec §4.7.

use std::sync::Arc;
use std::time::Duration;

use crate::core::error::EmbedderUnavailable;
use crate::vector_store::pending::{PendingVectorQueue, PendingVectorRecord};
use crate::vector_store::VectorStore;

const BATCH_SIZE: usize = 5;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run(queue: Arc<PendingVectorQueue>, store: Arc<VectorStore>) {
    loop {
        let now = chrono::Utc::now().timestamp();
        let batch = match queue.pop(BATCH_SIZE, now) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "pending-vector queue pop failed");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        if batch.is_empty() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        for record in batch {
            process_one(&queue, &store, record, now).await;
        }
    }
}

async fn process_one(queue: &PendingVectorQueue, store: &VectorStore, record: PendingVectorRecord, now: i64) {
    if matches!(queue.already_indexed(&record.doc_id, &record.content_hash), Ok(true)) {
        return;
    }

    match index_from_pending(store, &record).await {
        Ok(()) => {
            if let Err(e) = queue.mark_indexed(&record.doc_id, &record.content_hash) {
                tracing::error!(doc_id = %record.doc_id, error = %e, "mark_indexed failed");
            }
        }
        Err(_unavailable) => {
            if let Err(e) = queue.reschedule(&record, now) {
                tracing::error!(doc_id = %record.doc_id, error = %e, "reschedule failed");
            }
        }
    }
}

async fn index_from_pending(store: &VectorStore, record: &PendingVectorRecord) -> Result<(), EmbedderUnavailable> {
    let chunks: Vec<String> = serde_json::from_str(&record.chunks_json).unwrap_or_default();
    let combined = chunks.join(" ");
    let title = if record.resolved_title.is_empty() {
        None
    } else {
        Some(record.resolved_title.as_str())
    };
    let url = record.url.as_deref();

    let response = store
        .upsert_document(&combined, url, title, None)
        .await
        .map_err(|e| EmbedderUnavailable {
            model: "unknown".to_string(),
            detail: e.to_string(),
            autopull_started: false,
        })?;

    if response.queued {
        return Err(EmbedderUnavailable {
            model: "unknown".to_string(),
            detail: "embedder still unavailable".to_string(),
            autopull_started: false,
        });
    }
    Ok(())
}
