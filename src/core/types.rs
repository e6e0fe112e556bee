use serde::{Deserialize, Serialize};

/// Normalized document, the output of the Normalizer (spec §3/§4.1).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Document {
    pub url: String,
    #[serde(default)]
    pub canonical_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub h1h2: String,
    pub body: String,
    pub lang: String,
    pub fetched_at: String,
    #[serde(default)]
    pub outlinks: Vec<String>,
    pub status_code: u16,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Raw crawl record, the Crawler's output and the Normalizer's input.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RawCrawlRecord {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub title: Option<String>,
    pub html: String,
    pub fetched_at: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub outlinks: Vec<String>,
}

/// `{content_hash: 256-bit hex, simhash: 64-bit unsigned}` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentFingerprint {
    pub content_hash: [u8; 32],
    pub simhash: u64,
}

/// A scored crawl candidate produced by Discovery (spec §3).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Candidate {
    pub url: String,
    pub source: String,
    pub boost: f64,
    #[serde(default)]
    pub value_prior: f64,
    #[serde(default)]
    pub freshness: f64,
    #[serde(default)]
    pub authority: f64,
    pub score: f64,
}

/// Tagged-union of the heterogeneous discovery hints the API accepts
/// (spec §9, "dynamic/duck-typed inputs → tagged variants").
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryHint {
    Html(String),
    Entity(EntityHint),
    Repo(RepoHint),
    SitemapGroup(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EntityHint {
    pub name: String,
    #[serde(default)]
    pub official_website: Option<String>,
    #[serde(default)]
    pub sitelinks: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RepoHint {
    pub homepage: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JobStats {
    #[serde(default)]
    pub seed_count: usize,
    #[serde(default)]
    pub pages_fetched: usize,
    #[serde(default)]
    pub normalized_docs: usize,
    #[serde(default)]
    pub docs_indexed: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub deduped: usize,
    #[serde(default)]
    pub embedded: usize,
    #[serde(default)]
    pub new_domains: usize,
}

impl JobStats {
    /// Merges another snapshot in, keeping all counters monotone
    /// non-decreasing (spec §4.10, "Stats aggregated ... monotone
    /// non-decreasingly").
    pub fn merge_forward(&mut self, other: &JobStats) {
        self.seed_count = self.seed_count.max(other.seed_count);
        self.pages_fetched = self.pages_fetched.max(other.pages_fetched);
        self.normalized_docs = self.normalized_docs.max(other.normalized_docs);
        self.docs_indexed = self.docs_indexed.max(other.docs_indexed);
        self.skipped = self.skipped.max(other.skipped);
        self.deduped = self.deduped.max(other.deduped);
        self.embedded = self.embedded.max(other.embedded);
        self.new_domains = self.new_domains.max(other.new_domains);
    }
}

/// Job record for a focused-crawl run (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub normalized_query: String,
    pub display_query: String,
    pub state: JobState,
    pub stage: String,
    pub message: String,
    pub progress: u8,
    pub use_llm: bool,
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    pub updated_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub stats: JobStats,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The ordered stage list from spec §4.10/§4.11. Index order is the
/// canonical forward direction progress and stage transitions must respect.
pub const STAGE_ORDER: &[&str] = &[
    "starting",
    "frontier_start",
    "frontier_complete",
    "frontier_empty",
    "crawl_start",
    "crawl_complete",
    "normalize_start",
    "normalize_complete",
    "index_start",
    "index_complete",
    "index_skipped",
];

/// Default stage → progress mapping (spec §4.11).
pub fn default_stage_progress(stage: &str) -> Option<u8> {
    Some(match stage {
        "starting" => 5,
        "frontier_start" => 10,
        "frontier_complete" => 20,
        "crawl_start" => 30,
        "crawl_complete" => 55,
        "normalize_start" => 65,
        "normalize_complete" => 75,
        "index_start" => 85,
        "index_complete" | "index_skipped" | "frontier_empty" => 95,
        _ => return None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: String,
    pub message: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    pub stats: JobStats,
}

/// A single retrieved keyword or vector hit before blending (spec §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub raw_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Keyword,
    Semantic,
    KeywordSemantic,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::Keyword => "keyword",
            MatchReason::Semantic => "semantic",
            MatchReason::KeywordSemantic => "keyword+semantic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub blended_score: f64,
    pub match_reason: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Ok,
    FocusedCrawlRunning,
    NoResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: SearchStatus,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_index_time: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keyword_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSearchHit {
    pub url: String,
    pub title: String,
    pub chunk: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexUpsertResponse {
    pub doc_id: String,
    pub chunks: usize,
    pub dims: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub queued: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderState {
    Unknown,
    Warming,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderStatus {
    pub state: EmbedderState,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub query: String,
    #[serde(default)]
    pub use_llm: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub job_id: String,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<bool>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct IndexSearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: Option<std::collections::HashMap<String, String>>,
}

fn default_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct IndexUpsertRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    #[serde(default)]
    pub meta: Option<std::collections::HashMap<String, String>>,
}
