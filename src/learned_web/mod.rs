//! Learned-Web DB (C7): SQLite graph of domains/pages/links/crawls/
//! discoveries/query_embeddings (spec §3/§4.8). WAL mode, a single writer
//! mutex, `ON CONFLICT` monotone-max/additive semantics computed entirely
//! in SQL, matching spec §9's "do not compute current-value-then-update in
//! the application layer."

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::error::CoreError;

pub struct LearnedWebDb {
    conn: Mutex<Connection>,
}

impl LearnedWebDb {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, CoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Fatal(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| CoreError::Fatal(format!("open sqlite failed: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT UNIQUE NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                learned_score REAL NOT NULL DEFAULT 0,
                discovery_count INTEGER NOT NULL DEFAULT 0,
                last_discovery_reason TEXT,
                last_crawl_at INTEGER,
                last_index_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT UNIQUE NOT NULL,
                domain_id INTEGER NOT NULL REFERENCES domains(id),
                title TEXT,
                status INTEGER,
                fingerprint_simhash TEXT,
                fingerprint_md5 TEXT,
                fetched_at INTEGER,
                indexed_at INTEGER,
                crawl_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS links (
                from_page_id INTEGER NOT NULL,
                to_url TEXT NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                crawl_id INTEGER,
                UNIQUE(from_page_id, to_url)
            );
            CREATE TABLE IF NOT EXISTS crawls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                pages_fetched INTEGER NOT NULL DEFAULT 0,
                docs_indexed INTEGER NOT NULL DEFAULT 0,
                budget INTEGER,
                seed_count INTEGER,
                use_llm INTEGER NOT NULL DEFAULT 0,
                model TEXT,
                raw_path TEXT
            );
            CREATE TABLE IF NOT EXISTS discoveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                domain_id INTEGER NOT NULL REFERENCES domains(id),
                url TEXT NOT NULL,
                reason TEXT,
                source TEXT,
                score REAL NOT NULL,
                discovered_at INTEGER NOT NULL,
                crawl_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS query_embeddings (
                query TEXT PRIMARY KEY,
                embedding_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| CoreError::Fatal(format!("schema migration failed: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoreError> {
        self.conn.lock().map_err(|_| CoreError::Fatal("learned-web db lock poisoned".into()))
    }

    /// Monotone-max on `last_seen`/`last_crawl_at`/`last_index_at`/
    /// `learned_score`; additive on `discovery_count` (spec §4.8).
    pub fn upsert_domain(
        &self,
        host: &str,
        now: i64,
        learned_score: f64,
        discovery_delta: i64,
        reason: Option<&str>,
        crawl_at: Option<i64>,
        index_at: Option<i64>,
    ) -> Result<i64, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO domains (host, first_seen, last_seen, learned_score, discovery_count, last_discovery_reason, last_crawl_at, last_index_at)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(host) DO UPDATE SET
                last_seen = MAX(last_seen, excluded.last_seen),
                learned_score = MAX(learned_score, excluded.learned_score),
                discovery_count = discovery_count + ?4,
                last_discovery_reason = COALESCE(excluded.last_discovery_reason, last_discovery_reason),
                last_crawl_at = MAX(COALESCE(last_crawl_at, 0), COALESCE(excluded.last_crawl_at, 0)),
                last_index_at = MAX(COALESCE(last_index_at, 0), COALESCE(excluded.last_index_at, 0))",
            params![host, now, learned_score, discovery_delta, reason, crawl_at, index_at],
        )
        .map_err(|e| CoreError::Fatal(format!("upsert_domain failed: {e}")))?;

        conn.query_row("SELECT id FROM domains WHERE host = ?1", params![host], |row| row.get(0))
            .map_err(|e| CoreError::Fatal(e.to_string()))
    }

    /// `record_discovery`: upserts the host with the new score, appends a
    /// `discoveries` row, returns `(domain_id, created)` where `created` is
    /// true only on first sighting of the host.
    pub fn record_discovery(
        &self,
        query: &str,
        host: &str,
        url: &str,
        reason: &str,
        score: f64,
        source: Option<&str>,
        now: i64,
        crawl_id: Option<i64>,
    ) -> Result<(i64, bool), CoreError> {
        let existed = {
            let conn = self.lock()?;
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM domains WHERE host = ?1", params![host], |row| row.get(0))
                .optional()
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            existing.is_some()
        };

        let domain_id = self.upsert_domain(host, now, score, 1, Some(reason), None, None)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO discoveries (query, domain_id, url, reason, source, score, discovered_at, crawl_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![query, domain_id, url, reason, source, score, now, crawl_id],
        )
        .map_err(|e| CoreError::Fatal(format!("insert discovery failed: {e}")))?;

        Ok((domain_id, !existed))
    }

    pub fn upsert_page(
        &self,
        url: &str,
        domain_id: i64,
        title: Option<&str>,
        status: Option<i64>,
        simhash: Option<&str>,
        md5: Option<&str>,
        fetched_at: Option<i64>,
        crawl_id: Option<i64>,
    ) -> Result<i64, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pages (url, domain_id, title, status, fingerprint_simhash, fingerprint_md5, fetched_at, crawl_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(url) DO UPDATE SET
                title = COALESCE(excluded.title, title),
                status = COALESCE(excluded.status, status),
                fingerprint_simhash = COALESCE(excluded.fingerprint_simhash, fingerprint_simhash),
                fingerprint_md5 = COALESCE(excluded.fingerprint_md5, fingerprint_md5),
                fetched_at = MAX(COALESCE(fetched_at, 0), COALESCE(excluded.fetched_at, 0)),
                crawl_id = COALESCE(excluded.crawl_id, crawl_id)",
            params![url, domain_id, title, status, simhash, md5, fetched_at, crawl_id],
        )
        .map_err(|e| CoreError::Fatal(format!("upsert_page failed: {e}")))?;
        conn.query_row("SELECT id FROM pages WHERE url = ?1", params![url], |row| row.get(0))
            .map_err(|e| CoreError::Fatal(e.to_string()))
    }

    pub fn mark_page_indexed(&self, url: &str, indexed_at: i64) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pages SET indexed_at = MAX(COALESCE(indexed_at, 0), ?2) WHERE url = ?1",
            params![url, indexed_at],
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }

    pub fn record_link(&self, from_page_id: i64, to_url: &str, now: i64, crawl_id: Option<i64>) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO links (from_page_id, to_url, first_seen, last_seen, crawl_id)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(from_page_id, to_url) DO UPDATE SET
                last_seen = MAX(last_seen, excluded.last_seen)",
            params![from_page_id, to_url, now, crawl_id],
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }

    pub fn start_crawl(&self, query: &str, started_at: i64, budget: i64, seed_count: i64, use_llm: bool, model: Option<&str>) -> Result<i64, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO crawls (query, started_at, budget, seed_count, use_llm, model) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![query, started_at, budget, seed_count, use_llm as i64, model],
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn complete_crawl(&self, crawl_id: i64, completed_at: i64, pages_fetched: i64, docs_indexed: i64) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE crawls SET completed_at = ?2, pages_fetched = ?3, docs_indexed = ?4 WHERE id = ?1",
            params![crawl_id, completed_at, pages_fetched, docs_indexed],
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }

    /// `{host -> max(learned_score)}` used by Discovery (spec §4.8).
    pub fn domain_value_map(&self) -> Result<HashMap<String, f64>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT host, learned_score FROM domains")
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let mut map = HashMap::new();
        for row in rows {
            let (host, score) = row.map_err(|e| CoreError::Fatal(e.to_string()))?;
            map.insert(host, score);
        }
        Ok(map)
    }

    pub fn upsert_query_embedding(&self, query: &str, embedding: &[f32], now: i64) -> Result<(), CoreError> {
        let normalized = l2_normalize(embedding);
        let json = serde_json::to_string(&normalized).map_err(|e| CoreError::Fatal(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO query_embeddings (query, embedding_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(query) DO UPDATE SET embedding_json = excluded.embedding_json, updated_at = excluded.updated_at",
            params![query, json, now],
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }

    /// Scans stored query embeddings, keeps those with cosine >= `min_sim`,
    /// and for each top-matching past query yields its best-scored URLs
    /// until `limit` distinct URLs are produced (spec §4.8).
    pub fn similar_discovery_seeds(
        &self,
        embedding: &[f32],
        limit: usize,
        min_sim: f64,
        per_query: usize,
    ) -> Result<Vec<String>, CoreError> {
        let query_vec = l2_normalize(embedding);
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT query, embedding_json FROM query_embeddings")
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| CoreError::Fatal(e.to_string()))?;

        let mut scored: Vec<(String, f64)> = Vec::new();
        for row in rows {
            let (query, json) = row.map_err(|e| CoreError::Fatal(e.to_string()))?;
            let Ok(stored): Result<Vec<f32>, _> = serde_json::from_str(&json) else {
                continue;
            };
            let sim = cosine(&query_vec, &stored);
            if sim >= min_sim {
                scored.push((query, sim));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut seeds = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (query, _) in scored {
            let mut stmt = conn
                .prepare("SELECT url FROM discoveries WHERE query = ?1 ORDER BY score DESC LIMIT ?2")
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            let urls = stmt
                .query_map(params![query, per_query as i64], |row| row.get::<_, String>(0))
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            for url in urls {
                let url = url.map_err(|e| CoreError::Fatal(e.to_string()))?;
                if seen.insert(url.clone()) {
                    seeds.push(url);
                }
                if seeds.len() >= limit {
                    return Ok(seeds);
                }
            }
        }
        Ok(seeds)
    }
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_db() -> LearnedWebDb {
        let conn = Connection::open_in_memory().unwrap();
        let db = LearnedWebDb { conn: Mutex::new(conn) };
        db.migrate().unwrap();
        db
    }

    #[test]
    fn domain_upsert_last_seen_is_monotone() {
        let db = open_memory_db();
        db.upsert_domain("a.com", 100, 0.1, 1, None, None, None).unwrap();
        db.upsert_domain("a.com", 50, 0.05, 1, None, None, None).unwrap();
        let map = db.domain_value_map().unwrap();
        assert_eq!(map.get("a.com"), Some(&0.1));
    }

    #[test]
    fn record_discovery_created_only_on_first_sighting() {
        let db = open_memory_db();
        let (_, created1) = db.record_discovery("q", "a.com", "https://a.com/x", "seed", 0.5, None, 1, None).unwrap();
        let (_, created2) = db.record_discovery("q", "a.com", "https://a.com/y", "seed", 0.6, None, 2, None).unwrap();
        assert!(created1);
        assert!(!created2);
    }

    #[test]
    fn similar_discovery_seeds_respects_threshold() {
        let db = open_memory_db();
        db.upsert_query_embedding("old query", &[1.0, 0.0], 1).unwrap();
        db.record_discovery("old query", "a.com", "https://a.com/x", "seed", 0.9, None, 1, None).unwrap();

        let seeds = db.similar_discovery_seeds(&[1.0, 0.0], 5, 0.35, 5).unwrap();
        assert_eq!(seeds, vec!["https://a.com/x".to_string()]);

        let none = db.similar_discovery_seeds(&[0.0, 1.0], 5, 0.35, 5).unwrap();
        assert!(none.is_empty());
    }
}
