use std::env;
use std::path::{Path, PathBuf};

use crate::core::error::CoreError;

fn env_path(key: &str, default: impl Into<PathBuf>) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_ascii_lowercase();
            if v.is_empty() {
                default
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => default,
    }
}

/// Every filesystem location the system touches, collected into one typed
/// value (spec §9, "Filesystem paths as configuration"). Each component
/// receives `Paths` at construction rather than reading env vars itself.
#[derive(Clone, Debug)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub crawl_raw_dir: PathBuf,
    pub normalized_path: PathBuf,
    pub index_dir: PathBuf,
    pub index_ledger: PathBuf,
    pub simhash_path: PathBuf,
    pub last_index_time_path: PathBuf,
    pub logs_dir: PathBuf,
    pub chroma_dir: PathBuf,
    pub learned_web_db_path: PathBuf,
    pub app_state_db_path: PathBuf,
    /// Out-of-scope collaborator's storage (agent/bundle state). Carried so
    /// `Paths` stays the single source of truth for the ~10 locations the
    /// spec's design notes call out, even though the core never writes here.
    pub agent_data_dir: PathBuf,
    /// Out-of-scope collaborator's storage (telemetry). Same rationale.
    pub telemetry_dir: PathBuf,
}

impl Paths {
    pub fn from_env() -> Self {
        Self::from_data_dir(env_path("DATA_DIR", "data"))
    }

    /// Derives every location from a single `data_dir` (per-path env var
    /// overrides still apply on top). Used by tests that want an isolated,
    /// disposable directory tree without setting `DATA_DIR`.
    pub fn from_data_dir(data_dir: PathBuf) -> Self {
        Self {
            crawl_raw_dir: env_path("CRAWL_STORE", data_dir.join("crawl/raw")),
            normalized_path: env_path(
                "NORMALIZED_PATH",
                data_dir.join("normalized/normalized.jsonl"),
            ),
            index_dir: env_path("INDEX_DIR", data_dir.join("index")),
            index_ledger: env_path("INDEX_LEDGER", data_dir.join("index_ledger.json")),
            simhash_path: env_path("SIMHASH_PATH", data_dir.join("simhash_index.json")),
            last_index_time_path: env_path(
                "LAST_INDEX_TIME_PATH",
                data_dir.join("state/.last_index_time"),
            ),
            logs_dir: env_path("LOGS_DIR", data_dir.join("logs")),
            chroma_dir: data_dir.join("chroma"),
            learned_web_db_path: env_path(
                "LEARNED_WEB_DB_PATH",
                data_dir.join("learned_web.sqlite3"),
            ),
            app_state_db_path: data_dir.join("app_state.sqlite3"),
            agent_data_dir: data_dir.join("agent"),
            telemetry_dir: data_dir.join("telemetry"),
            data_dir,
        }
    }

    /// Validate that no configured location resolves to the filesystem root
    /// or the process's current working directory (spec §9: "validate at
    /// construction that none equal the filesystem root nor the repository
    /// root"). Called once at startup; a failure is `CoreError::Fatal`.
    pub fn validate(&self) -> Result<(), CoreError> {
        let forbidden = [Path::new("/"), Path::new(".")];
        let repo_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let all = [
            &self.data_dir,
            &self.crawl_raw_dir,
            &self.normalized_path,
            &self.index_dir,
            &self.index_ledger,
            &self.simhash_path,
            &self.last_index_time_path,
            &self.logs_dir,
            &self.chroma_dir,
            &self.learned_web_db_path,
            &self.app_state_db_path,
        ];

        for p in all {
            if forbidden.contains(&p.as_path()) || p == &repo_root {
                return Err(CoreError::Fatal(format!(
                    "configured path {} must not be the filesystem root or the repository root",
                    p.display()
                )));
            }
        }
        Ok(())
    }

    /// Create every directory this struct names (the file paths themselves
    /// are created lazily by their owning component).
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.data_dir,
            &self.crawl_raw_dir,
            &self.index_dir,
            &self.logs_dir,
            &self.chroma_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        for file in [
            &self.normalized_path,
            &self.index_ledger,
            &self.simhash_path,
            &self.last_index_time_path,
            &self.learned_web_db_path,
            &self.app_state_db_path,
        ] {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Hybrid blend weights (spec §4.12), renormalized to sum to 1.
#[derive(Clone, Copy, Debug)]
pub struct HybridWeights {
    pub keyword: f64,
    pub vector: f64,
}

impl HybridWeights {
    pub fn from_env() -> Self {
        let kw = env_parse("HYBRID_KEYWORD_WEIGHT", 0.6_f64);
        let vector = env_parse("HYBRID_VECTOR_WEIGHT", 0.4_f64);
        Self::normalized(kw, vector)
    }

    /// Renormalize to sum 1; degenerate (non-positive/non-finite) input
    /// falls back to an even 0.5/0.5 split (spec §4.12 step 3).
    pub fn normalized(keyword: f64, vector: f64) -> Self {
        let sum = keyword + vector;
        if sum <= 0.0 || !sum.is_finite() {
            Self {
                keyword: 0.5,
                vector: 0.5,
            }
        } else {
            Self {
                keyword: keyword / sum,
                vector: vector / sum,
            }
        }
    }
}

/// Discovery-candidate scoring weights (spec §3: `score = base·boost +
/// w_value·value_prior + w_fresh·freshness + w_auth·authority`).
#[derive(Clone, Copy, Debug)]
pub struct DiscoveryWeights {
    pub value: f64,
    pub freshness: f64,
    pub authority: f64,
}

impl DiscoveryWeights {
    pub fn from_env() -> Self {
        Self {
            value: env_parse("DISCOVER_W_VALUE", 0.5_f64),
            freshness: env_parse("DISCOVER_W_FRESH", 0.3_f64),
            authority: env_parse("DISCOVER_W_AUTH", 0.2_f64),
        }
    }
}

/// Frontier-shaping knobs (spec §4.6).
#[derive(Clone, Copy, Debug)]
pub struct FrontierConfig {
    pub per_host_cap: usize,
    pub politeness_delay_secs: f64,
    pub rerank_margin: f64,
}

impl FrontierConfig {
    pub fn from_env() -> Self {
        Self {
            per_host_cap: env_parse("FRONTIER_PER_HOST", 3usize),
            politeness_delay_secs: env_parse("FRONTIER_POLITENESS_DELAY", 1.0_f64),
            rerank_margin: env_parse("FRONTIER_RERANK_MARGIN", 0.15_f64),
        }
    }
}

/// Top-level runtime configuration, entirely env-driven (spec §6's
/// "Environment (selected)" list), mirroring the teacher's env-var-fallback
/// style (`core::config::ShadowConfig`) but without a JSON config file since
/// the spec names only environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    pub paths: Paths,
    pub smart_min_results: usize,
    pub smart_trigger_cooldown_secs: u64,
    pub smart_confidence_threshold: f64,
    pub focused_crawl_budget: usize,
    pub focused_crawl_enabled: bool,
    pub hybrid_weights: HybridWeights,
    pub hybrid_candidate_pool: usize,
    pub frontier: FrontierConfig,
    pub discovery_weights: DiscoveryWeights,
    pub embed_test_mode: bool,
    pub embed_model: String,
    pub embed_autopull: bool,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            paths: Paths::from_env(),
            smart_min_results: env_parse("SMART_MIN_RESULTS", 3usize),
            smart_trigger_cooldown_secs: env_parse("SMART_TRIGGER_COOLDOWN", 900u64),
            smart_confidence_threshold: env_parse("SMART_CONFIDENCE_THRESHOLD", 0.35_f64),
            focused_crawl_budget: env_parse("FOCUSED_CRAWL_BUDGET", 20usize),
            focused_crawl_enabled: env_bool("FOCUSED_CRAWL_ENABLED", true),
            hybrid_weights: HybridWeights::from_env(),
            hybrid_candidate_pool: env_parse("HYBRID_CANDIDATE_POOL", 40usize),
            frontier: FrontierConfig::from_env(),
            discovery_weights: DiscoveryWeights::from_env(),
            embed_test_mode: env_bool("EMBED_TEST_MODE", cfg!(feature = "embed_test_mode")),
            embed_model: env::var("EMBED_MODEL").unwrap_or_else(|_| "minishlab/potion-base-8M".to_string()),
            embed_autopull: env_bool("EMBED_AUTOPULL", true),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 20u64),
        }
    }
}

/// `candidate_limit = min(max(2k, k+5), pool_cap)` (spec §4.12 step 1).
pub fn keyword_candidate_limit(k: usize, pool_cap: usize) -> usize {
    (2 * k).max(k + 5).min(pool_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hybrid_weights_degenerate_falls_back_even() {
        let w = HybridWeights::normalized(0.0, 0.0);
        assert_eq!(w.keyword, 0.5);
        assert_eq!(w.vector, 0.5);
    }

    #[test]
    fn hybrid_weights_renormalize_to_one() {
        let w = HybridWeights::normalized(0.6, 0.4);
        assert!((w.keyword + w.vector - 1.0).abs() < 1e-9);
    }

    #[test]
    fn candidate_limit_bounds() {
        assert_eq!(keyword_candidate_limit(5, 40), 10);
        assert_eq!(keyword_candidate_limit(30, 40), 40);
    }
}
