use thiserror::Error;

/// Error taxonomy for the search/crawl core (spec §7).
///
/// Variants map to the six kinds described in the spec: invalid input,
/// resource-not-found, transient upstream, capacity, state corruption and
/// fatal. Component-internal errors (`EmbedderUnavailable`, `CrawlError`)
/// are their own types so callers can branch on them directly; they convert
/// into `CoreError` at the boundary where that's useful.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    #[error("capacity: {0}")]
    Capacity(String),

    #[error("state corruption (continuing with rebuild): {0}")]
    StateCorruption(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Raised by the embedder client when the configured model is unavailable on
/// the model host. Per spec §4.4: the caller must enqueue into the
/// pending-vectors queue rather than fail outright.
#[derive(Debug, Error, Clone)]
#[error("embedder unavailable: model={model} detail={detail}")]
pub struct EmbedderUnavailable {
    pub model: String,
    pub detail: String,
    pub autopull_started: bool,
}

/// Raised by the crawler on a failed fetch. Per spec §7, per-URL fetch
/// errors are counted and the pipeline moves on.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("rejected status {status} for {url}")]
    RejectedStatus { url: String, status: u16 },

    #[error("empty extracted text for {0}")]
    EmptyText(String),
}

/// Raised when an LLM-backed reranker call fails or returns something
/// unusable. Per spec §4.6, reranker failures are ignored (order unchanged)
/// — this type exists so call sites can log it distinctly before falling
/// back, rather than swallowing a generic error silently.
#[derive(Debug, Error)]
pub enum RerankError {
    #[error("rerank request failed: {0}")]
    Request(String),

    #[error("rerank response was not a JSON array of URLs")]
    MalformedResponse,
}
