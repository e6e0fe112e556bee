//! Discovery Engine (C8): merges registry seeds, the learned-web graph,
//! LLM-suggested URLs, and HTML-extracted anchors into a ranked
//! `Candidate[]` (spec §4.5).

use std::collections::HashMap;

use scraper::{Html, Selector};
use url::Url;

use crate::core::config::DiscoveryWeights;
use crate::core::types::{Candidate, DiscoveryHint};
use crate::fingerprint::tokenize_alnum;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "is", "are", "with", "how",
];

#[derive(Debug, Clone)]
pub struct RegistrySeed {
    pub id: String,
    pub url: String,
    pub trust_multiplier: f64,
    pub optional_boost: f64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LearnedSeed {
    pub url: String,
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct DiscoveryInput {
    pub query: String,
    pub limit: usize,
    pub extra_seeds: Vec<String>,
    pub html_snippets: Vec<String>,
    pub hints: Vec<DiscoveryHint>,
    pub registry: Vec<RegistrySeed>,
    pub learned: Vec<LearnedSeed>,
    pub domain_value_map: HashMap<String, f64>,
    pub use_llm: bool,
}

pub struct DiscoveryEngine {
    weights: DiscoveryWeights,
}

impl DiscoveryEngine {
    pub fn new(weights: DiscoveryWeights) -> Self {
        Self { weights }
    }

    fn keyword_set(query: &str) -> Vec<String> {
        let tokens: Vec<String> = tokenize_alnum(query)
            .into_iter()
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .collect();
        if tokens.is_empty() {
            tokenize_alnum(query)
        } else {
            tokens
        }
    }

    /// Runs the full pipeline of spec §4.5, returning deduplicated (by
    /// sanitized URL, max score kept) candidates.
    pub fn discover(&self, input: &DiscoveryInput) -> Vec<Candidate> {
        let keywords = Self::keyword_set(&input.query);
        let mut raw = Vec::new();

        // 2. Registry fold-in.
        let overlapping: Vec<&RegistrySeed> = input
            .registry
            .iter()
            .filter(|s| s.keywords.iter().any(|k| keywords.contains(k)))
            .collect();
        let registry_pool: Vec<&RegistrySeed> = if overlapping.is_empty() {
            input.registry.iter().collect()
        } else {
            overlapping
        };
        for seed in registry_pool {
            raw.push(partial_candidate(
                &seed.url,
                format!("registry:{}", seed.id),
                1.05 * seed.trust_multiplier * seed.optional_boost,
            ));
        }

        // 3. Learned fold-in.
        for seed in input.learned.iter().filter(|s| s.score > 0.0) {
            let mut c = partial_candidate(&seed.url, "learned".to_string(), 1.1);
            c.value_prior = seed.score;
            raw.push(c);
        }

        // 4. HTML snippets.
        for snippet in &input.html_snippets {
            for href in extract_anchors(snippet) {
                raw.push(partial_candidate(&href, "html".to_string(), 1.2));
            }
        }

        // 5. Manual seeds.
        for seed in &input.extra_seeds {
            raw.push(partial_candidate(seed, "manual".to_string(), 1.25));
        }

        // 6. Structured hints.
        for hint in &input.hints {
            raw.extend(self.expand_hint(hint));
        }

        // 7. Finalize: resolve priors, score, dedupe by sanitized URL.
        let mut by_url: HashMap<String, Candidate> = HashMap::new();
        for mut candidate in raw {
            let Some(sanitized) = sanitize_url(&candidate.url) else {
                continue;
            };
            candidate.url = sanitized.clone();
            if candidate.value_prior == 0.0 {
                candidate.value_prior = input
                    .domain_value_map
                    .get(&host_of(&sanitized).unwrap_or_default())
                    .copied()
                    .unwrap_or_else(|| heuristic_value_prior(&sanitized));
            }
            if candidate.freshness == 0.0 {
                candidate.freshness = freshness_for_source(&candidate.source);
            }
            if candidate.authority == 0.0 {
                candidate.authority = authority_for_host(&host_of(&sanitized).unwrap_or_default());
            }
            candidate.score = self.score(&candidate);

            by_url
                .entry(sanitized)
                .and_modify(|existing| {
                    if candidate.score > existing.score {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }

        let mut candidates: Vec<Candidate> = by_url.into_values().collect();
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(input.limit.max(1));
        candidates
    }

    fn score(&self, c: &Candidate) -> f64 {
        c.boost + self.weights.value * c.value_prior + self.weights.freshness * c.freshness
            + self.weights.authority * c.authority
    }

    fn expand_hint(&self, hint: &DiscoveryHint) -> Vec<Candidate> {
        match hint {
            DiscoveryHint::Html(snippet) => extract_anchors(snippet)
                .into_iter()
                .map(|href| partial_candidate(&href, "html".to_string(), 1.2))
                .collect(),
            DiscoveryHint::Entity(entity) => {
                let mut out = Vec::new();
                if let Some(site) = &entity.official_website {
                    out.push(partial_candidate(site, "entity:official".to_string(), 1.15));
                }
                for link in &entity.sitelinks {
                    out.push(partial_candidate(link, "entity:sitelink".to_string(), 1.15));
                }
                out
            }
            DiscoveryHint::Repo(repo) => {
                let base = repo.homepage.trim_end_matches('/');
                vec![
                    partial_candidate(&repo.homepage, "repo:homepage".to_string(), 1.2),
                    partial_candidate(&format!("{base}/wiki"), "repo:wiki".to_string(), 1.2),
                    partial_candidate(&format!("{base}/tree/main/docs"), "repo:docs".to_string(), 1.2),
                ]
            }
            DiscoveryHint::SitemapGroup(urls) => urls
                .iter()
                .map(|u| {
                    let mut c = partial_candidate(u, "sitemap".to_string(), 1.1);
                    c.freshness = 1.0;
                    c
                })
                .collect(),
        }
    }
}

fn partial_candidate(url: &str, source: String, boost: f64) -> Candidate {
    Candidate {
        url: url.to_string(),
        source,
        boost,
        value_prior: 0.0,
        freshness: 0.0,
        authority: 0.0,
        score: 0.0,
    }
}

fn freshness_for_source(source: &str) -> f64 {
    if source == "sitemap" {
        1.0
    } else if source.starts_with("feed") {
        0.9
    } else if source.contains("blog") || source.contains("news") {
        0.6
    } else {
        0.2
    }
}

fn heuristic_value_prior(url: &str) -> f64 {
    let lower = url.to_lowercase();
    let mut score: f64 = 0.1;
    if lower.contains("/docs") || lower.contains("/documentation") {
        score += 0.2;
    }
    if lower.ends_with(".org") || lower.contains(".org/") {
        score += 0.05;
    }
    if lower.ends_with(".edu") || lower.contains(".edu/") {
        score += 0.1;
    }
    score.min(1.0)
}

fn authority_for_host(host: &str) -> f64 {
    if host.ends_with(".gov") || host.ends_with(".edu") {
        0.8
    } else if host.ends_with(".org") {
        0.5
    } else {
        0.3
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Reject `javascript:`, normalize relative URLs, force https when scheme
/// absent, then canonicalize (spec §4.5, §3).
pub fn sanitize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with("javascript:") {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    crate::normalize::canonicalize_url(&with_scheme)
}

fn extract_anchors(html: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let doc = Html::parse_fragment(html);
    doc.select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(sanitize_url)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_javascript_scheme() {
        assert_eq!(sanitize_url("javascript:alert(1)"), None);
    }

    #[test]
    fn sanitize_forces_https_without_scheme() {
        assert_eq!(sanitize_url("example.com/x").unwrap(), "https://example.com/x");
    }

    #[test]
    fn sanitize_strips_trailing_slash_except_root() {
        assert_eq!(sanitize_url("https://example.com/x/").unwrap(), "https://example.com/x");
        assert_eq!(sanitize_url("https://example.com/").unwrap(), "https://example.com/");
    }

    #[test]
    fn discover_dedupes_by_url_keeping_max_score() {
        let engine = DiscoveryEngine::new(DiscoveryWeights { value: 0.5, freshness: 0.3, authority: 0.2 });
        let input = DiscoveryInput {
            query: "python packaging".to_string(),
            limit: 10,
            extra_seeds: vec!["https://example.com/docs".to_string(), "https://example.com/docs".to_string()],
            ..Default::default()
        };
        let candidates = engine.discover(&input);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn discover_falls_back_to_full_registry_when_no_overlap() {
        let engine = DiscoveryEngine::new(DiscoveryWeights { value: 0.5, freshness: 0.3, authority: 0.2 });
        let input = DiscoveryInput {
            query: "zzz".to_string(),
            limit: 10,
            registry: vec![RegistrySeed {
                id: "r1".to_string(),
                url: "https://docs.example.com".to_string(),
                trust_multiplier: 1.0,
                optional_boost: 1.0,
                keywords: vec!["packaging".to_string()],
            }],
            ..Default::default()
        };
        let candidates = engine.discover(&input);
        assert_eq!(candidates.len(), 1);
    }
}
