//! Frontier Builder (C9): per-host cap + politeness interleaving + optional
//! LLM rerank of close-scored candidates (spec §4.6).

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

use crate::core::config::FrontierConfig;
use crate::core::error::RerankError;
use crate::core::types::Candidate;

#[async_trait]
pub trait LlmRerankClient: Send + Sync {
    /// Sends candidate URLs, expects a JSON array of URLs ordered
    /// best-first. Malformed/non-JSON responses are the caller's signal to
    /// leave order unchanged (spec §4.6).
    async fn rerank(&self, query: &str, urls: &[String], model: Option<&str>) -> Result<Vec<String>, RerankError>;
}

pub struct FrontierBuilder {
    config: FrontierConfig,
}

impl FrontierBuilder {
    pub fn new(config: FrontierConfig) -> Self {
        Self { config }
    }

    pub async fn build(
        &self,
        mut candidates: Vec<Candidate>,
        budget: usize,
        query: &str,
        reranker: Option<(&dyn LlmRerankClient, Option<&str>)>,
    ) -> Vec<String> {
        // 1. Sort by descending score, stable tie-break on URL.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.url.cmp(&b.url))
        });

        // 2. Per-host cap.
        let mut per_host: HashMap<String, usize> = HashMap::new();
        let capped: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                let host = host_of(&c.url);
                let count = per_host.entry(host).or_insert(0);
                if *count < self.config.per_host_cap {
                    *count += 1;
                    true
                } else {
                    false
                }
            })
            .collect();

        // 4. Optional rerank of the top cluster within rerank_margin.
        let capped = if let Some((client, model)) = reranker {
            self.rerank_top_cluster(capped, query, client, model).await
        } else {
            capped
        };

        // 3. Interleave across hosts for politeness, then 5. truncate.
        interleave_by_host(capped)
            .into_iter()
            .take(budget)
            .collect()
    }

    async fn rerank_top_cluster(
        &self,
        candidates: Vec<Candidate>,
        query: &str,
        client: &dyn LlmRerankClient,
        model: Option<&str>,
    ) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }
        let leader_score = candidates[0].score;
        let margin = self.config.rerank_margin;

        let split = candidates
            .iter()
            .position(|c| leader_score - c.score > margin)
            .unwrap_or(candidates.len());
        if split <= 1 {
            return candidates;
        }

        let (cluster, rest) = candidates.split_at(split);
        let cluster_urls: Vec<String> = cluster.iter().map(|c| c.url.clone()).collect();

        match client.rerank(query, &cluster_urls, model).await {
            Ok(order) => {
                let mut by_url: HashMap<String, Candidate> =
                    cluster.iter().cloned().map(|c| (c.url.clone(), c)).collect();
                let mut reordered: Vec<Candidate> = order
                    .into_iter()
                    .filter_map(|url| by_url.remove(&url))
                    .collect();
                reordered.extend(by_url.into_values());
                reordered.extend(rest.iter().cloned());
                reordered
            }
            Err(e) => {
                tracing::warn!(error = %e, "rerank failed, leaving order unchanged");
                let mut out = cluster.to_vec();
                out.extend(rest.iter().cloned());
                out
            }
        }
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Round-robins candidates across hosts so no two consecutive URLs share a
/// host when an alternative exists (spec invariant 9, §4.6 step 3).
fn interleave_by_host(candidates: Vec<Candidate>) -> Vec<String> {
    let mut buckets: Vec<(String, Vec<String>)> = Vec::new();
    for c in candidates {
        let host = host_of(&c.url);
        match buckets.iter_mut().find(|(h, _)| h == &host) {
            Some((_, urls)) => urls.push(c.url),
            None => buckets.push((host, vec![c.url])),
        }
    }

    let mut out = Vec::new();
    loop {
        let mut progressed = false;
        for (_, urls) in buckets.iter_mut() {
            if let Some(url) = if urls.is_empty() { None } else { Some(urls.remove(0)) } {
                out.push(url);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, score: f64) -> Candidate {
        Candidate {
            url: url.to_string(),
            source: "test".to_string(),
            boost: 1.0,
            value_prior: 0.0,
            freshness: 0.0,
            authority: 0.0,
            score,
        }
    }

    #[tokio::test]
    async fn per_host_cap_is_enforced() {
        let builder = FrontierBuilder::new(FrontierConfig {
            per_host_cap: 3,
            politeness_delay_secs: 1.0,
            rerank_margin: 0.15,
        });
        let candidates = vec![
            candidate("https://x/1", 4.0),
            candidate("https://x/2", 3.5),
            candidate("https://x/3", 3.0),
            candidate("https://x/4", 2.5),
            candidate("https://y/1", 2.0),
            candidate("https://y/2", 1.5),
        ];
        let frontier = builder.build(candidates, 4, "q", None).await;
        let x_count = frontier.iter().filter(|u| u.contains("://x/")).count();
        assert_eq!(x_count, 3);
        assert_eq!(frontier.len(), 4);
    }

    #[tokio::test]
    async fn no_two_consecutive_urls_share_host_when_alternative_exists() {
        let builder = FrontierBuilder::new(FrontierConfig {
            per_host_cap: 3,
            politeness_delay_secs: 1.0,
            rerank_margin: 0.15,
        });
        let candidates = vec![
            candidate("https://x/1", 4.0),
            candidate("https://x/2", 3.5),
            candidate("https://x/3", 3.0),
            candidate("https://y/1", 2.0),
        ];
        let frontier = builder.build(candidates, 4, "q", None).await;
        for pair in frontier.windows(2) {
            assert_ne!(host_of(&pair[0]), host_of(&pair[1]));
        }
    }

    struct ReverseReranker;

    #[async_trait]
    impl LlmRerankClient for ReverseReranker {
        async fn rerank(&self, _query: &str, urls: &[String], _model: Option<&str>) -> Result<Vec<String>, RerankError> {
            let mut reversed = urls.to_vec();
            reversed.reverse();
            Ok(reversed)
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl LlmRerankClient for FailingReranker {
        async fn rerank(&self, _query: &str, _urls: &[String], _model: Option<&str>) -> Result<Vec<String>, RerankError> {
            Err(RerankError::Request("llm down".into()))
        }
    }

    #[tokio::test]
    async fn rerank_reorders_only_the_close_scored_cluster() {
        let builder = FrontierBuilder::new(FrontierConfig {
            per_host_cap: 10,
            politeness_delay_secs: 1.0,
            rerank_margin: 0.15,
        });
        // a/b/c are within the rerank margin of each other; d is far behind.
        let candidates = vec![
            candidate("https://x/a", 1.0),
            candidate("https://y/b", 0.95),
            candidate("https://z/c", 0.9),
            candidate("https://w/d", 0.1),
        ];
        let frontier = builder
            .build(candidates, 4, "q", Some((&ReverseReranker, None)))
            .await;
        // the reranker reversed a/b/c; d stays last regardless.
        assert_eq!(frontier.last().map(String::as_str), Some("https://w/d"));
        assert!(frontier.iter().position(|u| u == "https://z/c").unwrap() < frontier.len() - 1);
    }

    #[tokio::test]
    async fn rerank_failure_leaves_order_unchanged() {
        let builder = FrontierBuilder::new(FrontierConfig {
            per_host_cap: 10,
            politeness_delay_secs: 1.0,
            rerank_margin: 0.15,
        });
        let candidates = vec![candidate("https://x/a", 1.0), candidate("https://y/b", 0.95)];
        let frontier = builder
            .build(candidates.clone(), 2, "q", Some((&FailingReranker, None)))
            .await;
        assert_eq!(frontier, vec!["https://x/a".to_string(), "https://y/b".to_string()]);
    }
}
