//! Pending-Vectors Queue (C12 storage half): a durable FIFO of documents
//! whose embedding step failed, surviving embedder unavailability
//! (spec §4.7). Backed by `rusqlite` alongside the learned-web/job tables.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::core::error::CoreError;

const INITIAL_BACKOFF_SECS: i64 = 5;
const MAX_BACKOFF_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingVectorRecord {
    pub doc_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub resolved_title: String,
    pub content_hash: String,
    pub simhash: String,
    pub metadata: String,
    pub chunks_json: String,
    pub attempts: i64,
    pub next_attempt_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct PendingVectorQueue {
    conn: Mutex<Connection>,
}

impl PendingVectorQueue {
    pub fn open(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_vectors (
                doc_id TEXT PRIMARY KEY,
                job_id TEXT,
                url TEXT,
                title TEXT NOT NULL,
                resolved_title TEXT NOT NULL DEFAULT '',
                content_hash TEXT NOT NULL,
                simhash TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '',
                chunks_json TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS indexed_fingerprints (
                doc_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                PRIMARY KEY (doc_id, content_hash)
            );",
        )
        .map_err(|e| CoreError::Fatal(format!("pending_vectors schema init failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn enqueue(&self, record: &PendingVectorRecord) -> Result<(), CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Fatal("pending queue lock poisoned".into()))?;
        conn.execute(
            "INSERT INTO pending_vectors
                (doc_id, job_id, url, title, resolved_title, content_hash, simhash, metadata, chunks_json, attempts, next_attempt_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10, ?10)
             ON CONFLICT(doc_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                simhash = excluded.simhash,
                chunks_json = excluded.chunks_json,
                next_attempt_at = excluded.next_attempt_at,
                updated_at = excluded.updated_at",
            params![
                record.doc_id,
                record.job_id,
                record.url,
                record.title,
                record.resolved_title,
                record.content_hash,
                record.simhash,
                record.metadata,
                record.chunks_json,
                record.created_at,
            ],
        )
        .map_err(|e| CoreError::Fatal(format!("enqueue pending vector failed: {e}")))?;
        Ok(())
    }

    /// `pop(n)`: atomically selects and removes up to `n` rows whose
    /// `next_attempt_at <= now`, lowest first (spec §4.7).
    pub fn pop(&self, n: usize, now: i64) -> Result<Vec<PendingVectorRecord>, CoreError> {
        let mut conn = self.conn.lock().map_err(|_| CoreError::Fatal("pending queue lock poisoned".into()))?;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::Fatal(format!("tx begin failed: {e}")))?;

        let ids: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT doc_id FROM pending_vectors WHERE next_attempt_at <= ?1 ORDER BY next_attempt_at ASC LIMIT ?2",
                )
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            let rows = stmt
                .query_map(params![now, n as i64], |row| row.get::<_, String>(0))
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| CoreError::Fatal(e.to_string()))?
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(record) = fetch_one(&tx, id)? {
                records.push(record);
            }
            tx.execute("DELETE FROM pending_vectors WHERE doc_id = ?1", params![id])
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
        }

        tx.commit().map_err(|e| CoreError::Fatal(format!("tx commit failed: {e}")))?;
        Ok(records)
    }

    /// Reschedules a failed record with exponential backoff:
    /// `delay = min(max_backoff, initial_interval * 2^attempts)`.
    pub fn reschedule(&self, record: &PendingVectorRecord, now: i64) -> Result<(), CoreError> {
        let attempts = record.attempts + 1;
        let delay = exponential_backoff(attempts);
        let mut rescheduled = record.clone();
        rescheduled.attempts = attempts;
        rescheduled.next_attempt_at = now + delay;
        rescheduled.updated_at = now;
        self.enqueue(&rescheduled)
    }

    /// Marks `(doc_id, content_hash)` as indexed, enforcing at-most-once
    /// indexing (spec §4.7 invariant).
    pub fn mark_indexed(&self, doc_id: &str, content_hash: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Fatal("pending queue lock poisoned".into()))?;
        conn.execute(
            "INSERT OR IGNORE INTO indexed_fingerprints (doc_id, content_hash) VALUES (?1, ?2)",
            params![doc_id, content_hash],
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }

    pub fn already_indexed(&self, doc_id: &str, content_hash: &str) -> Result<bool, CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Fatal("pending queue lock poisoned".into()))?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM indexed_fingerprints WHERE doc_id = ?1 AND content_hash = ?2",
                params![doc_id, content_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(exists.is_some())
    }

    pub fn len(&self) -> Result<usize, CoreError> {
        let conn = self.conn.lock().map_err(|_| CoreError::Fatal("pending queue lock poisoned".into()))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM pending_vectors", [], |row| row.get(0))
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(count as usize)
    }
}

fn fetch_one(tx: &rusqlite::Transaction, doc_id: &str) -> Result<Option<PendingVectorRecord>, CoreError> {
    tx.query_row(
        "SELECT doc_id, job_id, url, title, resolved_title, content_hash, simhash, metadata, chunks_json, attempts, next_attempt_at, created_at, updated_at
         FROM pending_vectors WHERE doc_id = ?1",
        params![doc_id],
        |row| {
            Ok(PendingVectorRecord {
                doc_id: row.get(0)?,
                job_id: row.get(1)?,
                url: row.get(2)?,
                title: row.get(3)?,
                resolved_title: row.get(4)?,
                content_hash: row.get(5)?,
                simhash: row.get(6)?,
                metadata: row.get(7)?,
                chunks_json: row.get(8)?,
                attempts: row.get(9)?,
                next_attempt_at: row.get(10)?,
                created_at: row.get(11)?,
                updated_at: row.get(12)?,
            })
        },
    )
    .optional()
    .map_err(|e| CoreError::Fatal(e.to_string()))
}

fn exponential_backoff(attempts: i64) -> i64 {
    let factor = 1i64.checked_shl(attempts.min(20) as u32).unwrap_or(i64::MAX);
    INITIAL_BACKOFF_SECS.saturating_mul(factor).min(MAX_BACKOFF_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_queue() -> PendingVectorQueue {
        let conn = Connection::open_in_memory().unwrap();
        PendingVectorQueue::open(conn).unwrap()
    }

    fn sample(doc_id: &str, next_attempt_at: i64) -> PendingVectorRecord {
        PendingVectorRecord {
            doc_id: doc_id.to_string(),
            job_id: None,
            url: Some("https://x".to_string()),
            title: "t".to_string(),
            resolved_title: "t".to_string(),
            content_hash: "hash".to_string(),
            simhash: "0".to_string(),
            metadata: String::new(),
            chunks_json: "[]".to_string(),
            attempts: 0,
            next_attempt_at,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn pop_removes_due_records() {
        let queue = open_memory_queue();
        queue.enqueue(&sample("a", 0)).unwrap();
        queue.enqueue(&sample("b", 1000)).unwrap();
        let popped = queue.pop(10, 500).unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].doc_id, "a");
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn reschedule_increases_attempts_and_delay() {
        let queue = open_memory_queue();
        let record = sample("a", 0);
        queue.enqueue(&record).unwrap();
        queue.reschedule(&record, 100).unwrap();
        let popped = queue.pop(10, 0).unwrap();
        assert!(popped.is_empty());
        let popped_later = queue.pop(10, 1000).unwrap();
        assert_eq!(popped_later[0].attempts, 1);
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        assert_eq!(exponential_backoff(0), 5);
        assert_eq!(exponential_backoff(10), MAX_BACKOFF_SECS);
    }

    #[test]
    fn at_most_once_indexing_tracked() {
        let queue = open_memory_queue();
        assert!(!queue.already_indexed("a", "h").unwrap());
        queue.mark_indexed("a", "h").unwrap();
        assert!(queue.already_indexed("a", "h").unwrap());
    }
}
