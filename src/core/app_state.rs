//! Wires every component (Config/Paths, the two indexes, the learned-web
//! graph, the embedder, the job engine, the pipeline, the search service)
//! into one shared, cloneable handle, the way the teacher's `AppState`
//! wires its http client/caches/memory manager.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use crate::core::config::Config;
use crate::core::error::CoreError;
use crate::crawler::CrawlClient;
use crate::discovery::DiscoveryEngine;
use crate::embedder::{EmbedderClient, LocalEmbedder, TestModeEmbedder};
use crate::frontier::FrontierBuilder;
use crate::jobs::JobEngine;
use crate::keyword_index::KeywordIndex;
use crate::learned_web::LearnedWebDb;
use crate::pipeline::FocusedCrawlPipeline;
use crate::search::HybridSearchService;
use crate::vector_store::pending::PendingVectorQueue;
use crate::vector_store::VectorStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub keyword_index: Arc<KeywordIndex>,
    pub vector_store: Arc<VectorStore>,
    pub learned_web: Arc<LearnedWebDb>,
    pub pending_queue: Arc<PendingVectorQueue>,
    pub embedder: Arc<dyn EmbedderClient>,
    pub job_engine: Arc<JobEngine>,
    pub search_service: Arc<HybridSearchService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("data_dir", &self.config.paths.data_dir)
            .field("embed_test_mode", &self.config.embed_test_mode)
            .finish()
    }
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, CoreError> {
        config.paths.validate()?;
        config
            .paths
            .ensure_dirs()
            .map_err(|e| CoreError::Fatal(format!("cannot create data directories: {e}")))?;

        let keyword_index = Arc::new(KeywordIndex::ensure_index(&config.paths.index_dir)?);

        let embedder: Arc<dyn EmbedderClient> = if config.embed_test_mode {
            Arc::new(TestModeEmbedder::new())
        } else {
            Arc::new(LocalEmbedder::new(config.embed_model.clone(), config.embed_autopull))
        };

        let chroma_uri = config
            .paths
            .chroma_dir
            .to_str()
            .ok_or_else(|| CoreError::Fatal("chroma dir path is not valid UTF-8".into()))?
            .to_string();
        let vector_store = Arc::new(
            VectorStore::connect(&chroma_uri, embedder.clone(), &config.paths.simhash_path).await?,
        );

        let learned_web = Arc::new(LearnedWebDb::open(&config.paths.learned_web_db_path)?);

        let app_state_conn = Connection::open(&config.paths.app_state_db_path)
            .map_err(|e| CoreError::Fatal(format!("open app-state db failed: {e}")))?;
        let pending_queue = Arc::new(PendingVectorQueue::open(app_state_conn)?);

        let crawl_client = Arc::new(
            CrawlClient::new(
                Duration::from_secs_f64(config.frontier.politeness_delay_secs),
                Duration::from_secs(config.request_timeout_secs),
            )
            .map_err(|e| CoreError::Fatal(format!("crawl client init failed: {e}")))?,
        );

        let discovery = DiscoveryEngine::new(config.discovery_weights);
        let frontier = FrontierBuilder::new(config.frontier);

        let pipeline = Arc::new(FocusedCrawlPipeline {
            config: config.clone(),
            discovery,
            frontier,
            crawl_client: crawl_client.clone(),
            keyword_index: keyword_index.clone(),
            vector_store: vector_store.clone(),
            pending_queue: pending_queue.clone(),
            learned_web: learned_web.clone(),
        });

        let job_engine = JobEngine::new(
            pipeline,
            config.smart_trigger_cooldown_secs,
            config.focused_crawl_budget,
            config.paths.logs_dir.clone(),
        );

        let search_service = Arc::new(HybridSearchService {
            keyword_index: keyword_index.clone(),
            vector_store: vector_store.clone(),
            job_engine: job_engine.clone(),
            config: config.clone(),
        });

        tokio::spawn(crate::pending_worker::run(pending_queue.clone(), vector_store.clone()));

        Ok(Self {
            config,
            keyword_index,
            vector_store,
            learned_web,
            pending_queue,
            embedder,
            job_engine,
            search_service,
        })
    }
}
