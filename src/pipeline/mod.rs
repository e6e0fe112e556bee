//! Focused-Crawl Pipeline (C11): orchestrates C8->C9->C10->C1->(C2,C3)->C4->C5
//! for one query, emitting stage events (spec §4.10).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::core::config::Config;
use crate::core::error::CoreError;
use crate::core::types::{JobStats, RawCrawlRecord, StageEvent};
use crate::crawler::CrawlClient;
use crate::discovery::{DiscoveryEngine, DiscoveryInput, LearnedSeed};
use crate::frontier::FrontierBuilder;
use crate::jobs::FocusedCrawlRunner;
use crate::keyword_index::KeywordIndex;
use crate::learned_web::LearnedWebDb;
use crate::normalize;
use crate::vector_store::pending::{PendingVectorQueue, PendingVectorRecord};
use crate::vector_store::VectorStore;

const FETCH_CONCURRENCY: usize = 4;
/// Minimum cosine similarity between the current query's embedding and a
/// stored one before its discoveries are reused as seeds (spec §4.8).
const SIMILAR_SEED_MIN_SIM: f64 = 0.35;
/// URLs pulled per matching past query.
const SIMILAR_SEED_PER_QUERY: usize = 5;
/// Total similarity-seeded URLs folded into one run's discovery input.
const SIMILAR_SEED_LIMIT: usize = 10;
/// Prior assigned to a similarity-seeded URL before discovery rescoring.
const SIMILAR_SEED_PRIOR: f64 = 0.4;

pub struct FocusedCrawlPipeline {
    pub config: Config,
    pub discovery: DiscoveryEngine,
    pub frontier: FrontierBuilder,
    pub crawl_client: Arc<CrawlClient>,
    pub keyword_index: Arc<KeywordIndex>,
    pub vector_store: Arc<VectorStore>,
    pub pending_queue: Arc<PendingVectorQueue>,
    pub learned_web: Arc<LearnedWebDb>,
}

fn emit(cb: &Arc<dyn Fn(StageEvent) + Send + Sync>, stage: &str, message: &str, stats: &JobStats) {
    cb(StageEvent {
        stage: stage.to_string(),
        message: message.to_string(),
        progress: crate::core::types::default_stage_progress(stage).unwrap_or(0),
        eta_seconds: None,
        stats: stats.clone(),
    });
}

#[async_trait]
impl FocusedCrawlRunner for FocusedCrawlPipeline {
    async fn run_focused_crawl(
        &self,
        _job_id: &str,
        query: &str,
        budget: usize,
        use_llm: bool,
        model: Option<&str>,
        progress: Arc<dyn Fn(StageEvent) + Send + Sync>,
    ) -> Result<serde_json::Value, CoreError> {
        let mut stats = JobStats::default();
        emit(&progress, "starting", "starting focused crawl", &stats);

        let now = Utc::now().timestamp();
        let crawl_id = self.learned_web.start_crawl(query, now, budget as i64, 0, use_llm, model)?;

        // C8: discovery.
        emit(&progress, "frontier_start", "discovering candidates", &stats);
        let domain_value_map = self.learned_web.domain_value_map()?;
        let mut learned_seeds: Vec<LearnedSeed> = domain_value_map
            .iter()
            .map(|(host, score)| LearnedSeed {
                url: format!("https://{host}"),
                score: *score,
            })
            .collect();

        // C7 similarity-seeded bootstrap: reuse discoveries from past
        // queries whose embedding is close to this one (spec §4.8, §4.10
        // step 2).
        if let Ok(query_vec) = self.vector_store.embed_query(query).await {
            if let Ok(seeds) =
                self.learned_web
                    .similar_discovery_seeds(&query_vec, SIMILAR_SEED_LIMIT, SIMILAR_SEED_MIN_SIM, SIMILAR_SEED_PER_QUERY)
            {
                learned_seeds.extend(seeds.into_iter().map(|url| LearnedSeed { url, score: SIMILAR_SEED_PRIOR }));
            }
            if let Err(e) = self.learned_web.upsert_query_embedding(query, &query_vec, now) {
                tracing::warn!(error = %e, "failed to persist query embedding");
            }
        }

        let input = DiscoveryInput {
            query: query.to_string(),
            limit: self.config.hybrid_candidate_pool,
            domain_value_map,
            learned: learned_seeds,
            use_llm,
            ..Default::default()
        };
        let candidates = self.discovery.discover(&input);
        stats.seed_count = candidates.len();

        // C7 value-prior accumulation: record every surviving candidate as
        // a discovery so its host's learned_score/discovery_count grow
        // (spec §4.8).
        for candidate in &candidates {
            let Some(host) = url::Url::parse(&candidate.url).ok().and_then(|u| u.host_str().map(|h| h.to_string())) else {
                continue;
            };
            if let Err(e) = self.learned_web.record_discovery(
                query,
                &host,
                &candidate.url,
                &candidate.source,
                candidate.score,
                Some(&candidate.source),
                now,
                Some(crawl_id),
            ) {
                tracing::warn!(url = %candidate.url, error = %e, "failed to record discovery");
            }
        }

        // C9: frontier.
        let frontier_urls = self.frontier.build(candidates, budget, query, None).await;
        if frontier_urls.is_empty() {
            emit(&progress, "frontier_empty", "no crawl candidates", &stats);
            self.learned_web.complete_crawl(crawl_id, Utc::now().timestamp(), 0, 0)?;
            return Ok(serde_json::json!({"pages_fetched": 0, "docs_indexed": 0}));
        }
        emit(&progress, "frontier_complete", &format!("frontier of {} urls", frontier_urls.len()), &stats);

        // C10: fetch.
        emit(&progress, "crawl_start", "fetching pages", &stats);
        let raw_records = self.fetch_all(&frontier_urls, crawl_id).await;
        stats.pages_fetched = raw_records.len();
        emit(&progress, "crawl_complete", &format!("fetched {} pages", raw_records.len()), &stats);

        // C1: normalize.
        emit(&progress, "normalize_start", "normalizing pages", &stats);
        let docs = normalize::normalize_batch(&raw_records);
        stats.normalized_docs = docs.len();
        emit(&progress, "normalize_complete", &format!("normalized {} docs", docs.len()), &stats);

        if docs.is_empty() {
            emit(&progress, "index_skipped", "nothing to index", &stats);
            self.learned_web.complete_crawl(crawl_id, Utc::now().timestamp(), stats.pages_fetched as i64, 0)?;
            return Ok(serde_json::json!({"pages_fetched": stats.pages_fetched, "docs_indexed": 0}));
        }

        // C4 + C5: incremental index + vector upsert.
        emit(&progress, "index_start", "indexing documents", &stats);
        let last_index_time_path = self.config.paths.last_index_time_path.clone();
        let kw_stats = self.keyword_index.incremental_index(&docs, &last_index_time_path)?;
        stats.deduped += kw_stats.deduped;
        stats.skipped += kw_stats.skipped;
        stats.docs_indexed += kw_stats.added;

        for doc in &docs {
            match self
                .vector_store
                .upsert_document(&doc.body, Some(&doc.url), Some(&doc.title), None)
                .await
            {
                Ok(response) if response.queued => {
                    self.enqueue_pending(doc, &response.doc_id)?;
                }
                Ok(response) if !response.skipped => {
                    stats.embedded += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(url = %doc.url, error = %e, "vector upsert failed, enqueuing pending");
                }
            }
            self.learned_web.mark_page_indexed(&doc.url, Utc::now().timestamp())?;
        }

        emit(&progress, "index_complete", "indexing complete", &stats);
        self.learned_web
            .complete_crawl(crawl_id, Utc::now().timestamp(), stats.pages_fetched as i64, stats.docs_indexed as i64)?;

        Ok(serde_json::json!({
            "pages_fetched": stats.pages_fetched,
            "docs_indexed": stats.docs_indexed,
            "embedded": stats.embedded,
        }))
    }
}

impl FocusedCrawlPipeline {
    async fn fetch_all(&self, urls: &[String], crawl_id: i64) -> Vec<RawCrawlRecord> {
        let client = self.crawl_client.clone();
        let learned_web = self.learned_web.clone();
        let fetched_at = Utc::now().to_rfc3339();

        let results: Vec<Option<RawCrawlRecord>> = stream::iter(urls.iter().cloned())
            .map(|url| {
                let client = client.clone();
                let learned_web = learned_web.clone();
                let fetched_at = fetched_at.clone();
                async move {
                    match client.fetch(&url).await {
                        Ok(Some(result)) => {
                            if let Some(host) = url::Url::parse(&url).ok().and_then(|u| u.host_str().map(|h| h.to_string())) {
                                // Bumps last_crawl_at only; discoveries are recorded separately.
                                if let Ok(domain_id) = learned_web.upsert_domain(&host, Utc::now().timestamp(), 0.0, 0, None, Some(Utc::now().timestamp()), None) {
                                    if let Ok(page_id) = learned_web.upsert_page(&url, domain_id, result.title.as_deref(), Some(result.status as i64), None, None, Some(Utc::now().timestamp()), Some(crawl_id)) {
                                        for link in &result.outlinks {
                                            let _ = learned_web.record_link(page_id, link, Utc::now().timestamp(), Some(crawl_id));
                                        }
                                    }
                                }
                            }
                            Some(CrawlClient::to_raw_record(&result, fetched_at))
                        }
                        Ok(None) => None,
                        Err(e) => {
                            tracing::warn!(url = %url, error = %e, "fetch failed, skipping");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    fn enqueue_pending(&self, doc: &crate::core::types::Document, doc_id: &str) -> Result<(), CoreError> {
        let now = Utc::now().timestamp();
        let chunks = crate::vector_store::chunk_text(&doc.body);
        let chunks_json = serde_json::to_string(
            &chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>(),
        )
        .map_err(|e| CoreError::Fatal(e.to_string()))?;

        self.pending_queue.enqueue(&PendingVectorRecord {
            doc_id: doc_id.to_string(),
            job_id: None,
            url: Some(doc.url.clone()),
            title: doc.title.clone(),
            resolved_title: doc.title.clone(),
            content_hash: crate::fingerprint::content_hash_hex(&doc.title, &doc.h1h2, &doc.body),
            simhash: crate::fingerprint::simhash64(&doc.body).to_string(),
            metadata: String::new(),
            chunks_json,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        })
    }
}
