//! Hybrid search: blends keyword and vector retrieval, merges by URL, and
//! falls back to a focused crawl via the job engine on low coverage.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::core::config::{keyword_candidate_limit, Config};
use crate::core::types::{MatchReason, SearchHit, SearchResponse, SearchStatus};
use crate::jobs::JobEngine;
use crate::keyword_index::{KeywordIndex, SearchOptions};
use crate::vector_store::VectorStore;

const VECTOR_SNIPPET_CHARS: usize = 360;
const KEYWORD_SNIPPET_CHARS: usize = 240;

pub struct HybridSearchService {
    pub keyword_index: Arc<KeywordIndex>,
    pub vector_store: Arc<VectorStore>,
    pub job_engine: Arc<JobEngine>,
    pub config: Config,
}

struct Blended {
    title: String,
    snippet: String,
    keyword_raw: Option<f64>,
    vector_raw: Option<f64>,
}

impl HybridSearchService {
    /// `run_query` per spec §4.12's 6 steps.
    pub async fn run_query(
        &self,
        query: &str,
        limit: usize,
        use_llm: bool,
        model: Option<String>,
    ) -> SearchResponse {
        let limit = limit.max(1);
        let candidate_limit = keyword_candidate_limit(limit, self.config.hybrid_candidate_pool);

        // 1. Keyword-side retrieval.
        let keyword_hits = self
            .keyword_index
            .search(
                query,
                &SearchOptions {
                    site: None,
                    in_title: false,
                    page: 0,
                    per_page: candidate_limit,
                },
            )
            .unwrap_or_default();

        // 2. Vector-side retrieval.
        let vector_hits = self.vector_store.search(query, limit, None).await;
        let keyword_fallback = vector_hits.is_err();
        let vector_hits = vector_hits.unwrap_or_default();

        // 3. Per-side max-normalization.
        let kw_max = keyword_hits.iter().map(|h| h.score).fold(0.0_f64, f64::max);
        let vec_max = vector_hits.iter().map(|h| h.3).fold(0.0_f64, f64::max);
        let weights = &self.config.hybrid_weights;

        // 4. Merge by URL.
        let mut merged: HashMap<String, Blended> = HashMap::new();
        for hit in &keyword_hits {
            let normalized = if kw_max > 0.0 { hit.score / kw_max } else { 0.0 };
            merged.insert(
                hit.url.clone(),
                Blended {
                    title: hit.title.clone(),
                    snippet: keyword_snippet(&hit.body, query),
                    keyword_raw: Some(normalized),
                    vector_raw: None,
                },
            );
        }
        for (url, title, text, score) in &vector_hits {
            let normalized = if vec_max > 0.0 { score / vec_max } else { 0.0 };
            merged
                .entry(url.clone())
                .and_modify(|b| b.vector_raw = Some(normalized))
                .or_insert(Blended {
                    title: title.clone(),
                    snippet: vector_snippet(text),
                    keyword_raw: None,
                    vector_raw: Some(normalized),
                });
        }

        // 5. Blend, sort, truncate.
        let mut hits: Vec<SearchHit> = merged
            .into_iter()
            .map(|(url, b)| {
                let kw = b.keyword_raw.unwrap_or(0.0);
                let vec = b.vector_raw.unwrap_or(0.0);
                let blended = weights.keyword * kw + weights.vector * vec;
                let match_reason = match (b.keyword_raw.is_some(), b.vector_raw.is_some()) {
                    (true, true) => MatchReason::KeywordSemantic,
                    (true, false) => MatchReason::Keyword,
                    (false, true) => MatchReason::Semantic,
                    (false, false) => MatchReason::Keyword,
                };
                let domain = host_of(&url);
                SearchHit {
                    url,
                    title: b.title,
                    snippet: b.snippet,
                    score: blended,
                    blended_score: blended,
                    match_reason: match_reason.as_str().to_string(),
                    domain,
                    about: None,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.blended_score.partial_cmp(&a.blended_score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        let confidence = hits.first().map(|h| h.blended_score);
        let last_index_time = read_last_index_time(&self.config.paths.last_index_time_path);

        // 6. Low-coverage / low-confidence focused crawl trigger.
        let low_coverage = hits.len() < self.config.smart_min_results
            || confidence.map(|c| c < self.config.smart_confidence_threshold).unwrap_or(true);

        if low_coverage && self.config.focused_crawl_enabled {
            let (job, created, _deduplicated) = self.job_engine.enqueue(query, use_llm, model).await;
            let _ = created;
            return SearchResponse {
                status: SearchStatus::FocusedCrawlRunning,
                results: hits,
                confidence,
                job_id: Some(job.id),
                last_index_time,
                keyword_fallback,
            };
        }

        if hits.is_empty() {
            return SearchResponse {
                status: SearchStatus::NoResults,
                results: hits,
                confidence,
                job_id: None,
                last_index_time,
                keyword_fallback,
            };
        }

        SearchResponse {
            status: SearchStatus::Ok,
            results: hits,
            confidence,
            job_id: None,
            last_index_time,
            keyword_fallback,
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string()))
}

fn keyword_snippet(body: &str, query: &str) -> String {
    let excerpt = truncate_chars(body, KEYWORD_SNIPPET_CHARS);
    highlight(&excerpt, query)
}

fn vector_snippet(text: &str) -> String {
    truncate_chars(text, VECTOR_SNIPPET_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

fn chars_match_ci(a: char, b: char) -> bool {
    a.to_lowercase().eq(b.to_lowercase())
}

/// Finds the char index (into `chars`) of the earliest occurrence of `term`
/// at or after `from`, comparing case-insensitively char by char so a
/// casing change that shifts UTF-8 byte length (e.g. `İ`) never throws the
/// match off a char boundary.
fn find_term_at(chars: &[char], from: usize, term: &[char]) -> Option<usize> {
    if term.is_empty() || from + term.len() > chars.len() {
        return None;
    }
    (from..=chars.len() - term.len())
        .find(|&i| (0..term.len()).all(|j| chars_match_ci(chars[i + j], term[j])))
}

/// Wraps case-insensitive query-term matches in `<mark>` tags. Matches are
/// found against `text`'s own chars, never against a separately-lowercased
/// copy, so byte offsets always stay valid for `text`.
fn highlight(text: &str, query: &str) -> String {
    let terms: Vec<Vec<char>> = query
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.chars().collect())
        .collect();
    if terms.is_empty() {
        return text.to_string();
    }

    let byte_pos: Vec<usize> = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let chars: Vec<char> = text.chars().collect();

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let hit = terms
            .iter()
            .filter_map(|term| find_term_at(&chars, i, term).map(|pos| (pos, term.len())))
            .min_by_key(|(pos, _)| *pos);
        match hit {
            Some((pos, len)) => {
                out.push_str(&text[byte_pos[i]..byte_pos[pos]]);
                out.push_str("<mark>");
                out.push_str(&text[byte_pos[pos]..byte_pos[pos + len]]);
                out.push_str("</mark>");
                i = pos + len;
            }
            None => {
                out.push_str(&text[byte_pos[i]..]);
                break;
            }
        }
    }
    out
}

fn read_last_index_time(path: &std::path::Path) -> Option<i64> {
    std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlight_wraps_case_insensitive_terms() {
        let out = highlight("Install Packages quickly", "packages");
        assert_eq!(out, "Install <mark>Packages</mark> quickly");
    }

    #[test]
    fn highlight_does_not_panic_on_length_changing_casefold() {
        // 'İ' (U+0130) lowercases to "i\u{307}" (2 chars), so a naive
        // lowercased-copy byte offset would drift past the original text.
        let out = highlight("İstanbul guide and İzmir guide", "guide");
        assert_eq!(out, "İstanbul <mark>guide</mark> and İzmir <mark>guide</mark>");
    }

    #[test]
    fn truncate_chars_adds_ellipsis_when_over_limit() {
        let long = "a".repeat(400);
        let out = truncate_chars(&long, 360);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 363);
    }

    #[test]
    fn truncate_chars_leaves_short_text_unchanged() {
        assert_eq!(truncate_chars("short", 360), "short");
    }
}
