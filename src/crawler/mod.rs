//! Crawler (C10): polite HTTP(S) fetcher with per-request throttling,
//! ETag/Last-Modified awareness, and content extraction. Reuses the
//! teacher's `reqwest::Client` builder/timeout-config style from its HTTP
//! bootstrap, narrowed to the spec's single `fetch()` contract with a
//! mutex-guarded last-fetch timestamp for global-to-the-instance politeness.

use std::io::Cursor;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Mutex;
use url::Url;

use crate::core::error::CrawlError;
use crate::core::types::RawCrawlRecord;
use crate::fingerprint;

const DEFAULT_USER_AGENT: &str = "focusengine/0.1 (+focused-crawl)";
const LOW_TEXT_THRESHOLD_CHARS: usize = 200;

pub struct CrawlResult {
    pub url: String,
    pub status: u16,
    pub html: String,
    pub text: String,
    pub title: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_hash: String,
    pub outlinks: Vec<String>,
}

pub struct CrawlClient {
    client: Client,
    min_delay: Duration,
    last_fetch: Mutex<Option<Instant>>,
}

impl CrawlClient {
    pub fn new(min_delay: Duration, request_timeout: Duration) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(request_timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| CrawlError::Http {
                url: "<client-build>".to_string(),
                source: e,
            })?;
        Ok(Self {
            client,
            min_delay,
            last_fetch: Mutex::new(None),
        })
    }

    /// `fetch(url)` per spec §4.9. The delay lock is held across the HTTP
    /// call, so throttling is global to this client instance even under
    /// concurrent callers.
    pub async fn fetch(&self, url: &str) -> Result<Option<CrawlResult>, CrawlError> {
        let parsed = Url::parse(url).map_err(|_| CrawlError::InvalidUrl(url.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CrawlError::InvalidUrl(url.to_string()));
        }

        let mut guard = self.last_fetch.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| CrawlError::Http {
                url: url.to_string(),
                source: e,
            })?;
        *guard = Some(Instant::now());
        drop(guard);

        let status = response.status().as_u16();
        if status >= 400 {
            return Ok(None);
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let html = response.text().await.map_err(|e| CrawlError::Http {
            url: url.to_string(),
            source: e,
        })?;

        let (text, title, outlinks) = extract(&html, &parsed);
        if text.trim().is_empty() {
            return Err(CrawlError::EmptyText(url.to_string()));
        }

        let content_hash = fingerprint::content_hash_hex("", "", &text);

        Ok(Some(CrawlResult {
            url: url.to_string(),
            status,
            html,
            text,
            title,
            etag,
            last_modified,
            content_hash,
            outlinks,
        }))
    }

    /// True when the plain-fetch body fell below the low-text threshold,
    /// signaling the headless-browser fallback should be tried (spec §4.9).
    pub fn needs_headless_fallback(result: &CrawlResult) -> bool {
        result.text.chars().count() < LOW_TEXT_THRESHOLD_CHARS
    }

    pub fn to_raw_record(result: &CrawlResult, fetched_at: String) -> RawCrawlRecord {
        RawCrawlRecord {
            url: result.url.clone(),
            status: result.status,
            title: result.title.clone(),
            html: result.html.clone(),
            fetched_at,
            content_type: None,
            outlinks: result.outlinks.clone(),
        }
    }
}

fn extract(html: &str, base: &Url) -> (String, Option<String>, Vec<String>) {
    let mut cursor = Cursor::new(html.as_bytes());
    match readability::extractor::extract(&mut cursor, base) {
        Ok(product) => {
            let text = plain_text(&product.content);
            let outlinks = extract_links(html, base);
            (text, Some(product.title).filter(|t| !t.is_empty()), outlinks)
        }
        Err(_) => (plain_text(html), None, extract_links(html, base)),
    }
}

fn plain_text(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let Ok(sel) = scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };
    let doc = scraper::Html::parse_document(html);
    doc.select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(|u| u.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_rejects_non_http_scheme() {
        let client = CrawlClient::new(Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        let err = client.fetch("ftp://example.com").await.unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl(_)));
    }

    #[test]
    fn low_text_threshold_triggers_fallback() {
        let result = CrawlResult {
            url: "https://x".to_string(),
            status: 200,
            html: String::new(),
            text: "short".to_string(),
            title: None,
            etag: None,
            last_modified: None,
            content_hash: String::new(),
            outlinks: Vec::new(),
        };
        assert!(CrawlClient::needs_headless_fallback(&result));
    }
}
