//! Normalizer (C1): raw crawl record -> `Document`.
//!
//! Built from the same crates the teacher's HTML pipeline used
//! (`readability` for precision body extraction, `scraper` for heading/link
//! collection, `whatlang` for language detection) but retargeted to the
//! spec's much smaller `{url, title, h1h2, body, lang, outlinks}` output
//! instead of the teacher's full `ScrapeResponse`.

use std::io::Cursor;

use scraper::{Html, Selector};
use url::Url;

use crate::core::types::{Document, RawCrawlRecord};

const LANG_DETECT_PREFIX_CHARS: usize = 1000;

/// Canonicalize a URL per spec §3 / §8 invariant 3: lowercase scheme/host
/// (done by `Url::parse` itself), strip default ports, resolve dot-segments
/// (also handled by `Url::parse`'s path parser), sort query keys, drop the
/// fragment, no trailing slash except root. Idempotent:
/// `canonicalize_url(canonicalize_url(u)?) == canonicalize_url(u)`.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => unreachable!(),
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    if url.path().len() > 1 && url.path().ends_with('/') {
        let trimmed_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed_path);
    }

    if let Some(query) = url.query() {
        let mut pairs: Vec<(String, String)> =
            url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();
        pairs.sort();
        let sorted = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        url.set_query(if sorted.is_empty() { None } else { Some(&sorted) });
    }

    Some(url.to_string())
}

/// Normalize one raw record, applying spec §4.1's rules. Returns `None` for
/// records that must be dropped (missing url, status >= 400, empty body).
pub fn normalize(record: &RawCrawlRecord) -> Option<Document> {
    if record.url.trim().is_empty() {
        return None;
    }
    if record.status >= 400 {
        return None;
    }
    let raw_url = record.url.trim().to_string();
    let canonical = canonicalize_url(&raw_url)?;

    let fragment = Html::parse_document(&record.html);
    let body = extract_body(&record.html, &record.url).unwrap_or_else(|| strip_tags(&record.html));
    let body = body.trim().to_string();
    if body.is_empty() {
        return None;
    }

    let title = record
        .title
        .clone()
        .unwrap_or_else(|| extract_title(&fragment).unwrap_or_default());
    let h1h2 = extract_h1h2(&fragment);
    let lang = detect_language(&body);
    let outlinks = if record.outlinks.is_empty() {
        extract_outlinks(&fragment, &record.url)
    } else {
        record.outlinks.clone()
    };

    Some(Document {
        url: canonical.clone(),
        canonical_url: if canonical == raw_url { None } else { Some(raw_url) },
        title,
        h1h2,
        body,
        lang,
        fetched_at: record.fetched_at.clone(),
        outlinks,
        status_code: record.status,
        content_type: record.content_type.clone(),
    })
}

/// Normalize a batch, deduplicating within the batch by final `url` (last
/// wins), per spec §4.1.
pub fn normalize_batch(records: &[RawCrawlRecord]) -> Vec<Document> {
    let mut by_url = indexmap_like_dedup(records);
    by_url.retain(|doc| !doc.body.is_empty());
    by_url
}

fn indexmap_like_dedup(records: &[RawCrawlRecord]) -> Vec<Document> {
    let mut order: Vec<String> = Vec::new();
    let mut docs: std::collections::HashMap<String, Document> = std::collections::HashMap::new();
    for record in records {
        if let Some(doc) = normalize(record) {
            if !docs.contains_key(&doc.url) {
                order.push(doc.url.clone());
            }
            docs.insert(doc.url.clone(), doc);
        }
    }
    order.into_iter().filter_map(|url| docs.remove(&url)).collect()
}

fn extract_body(html: &str, base_url: &str) -> Option<String> {
    let mut cursor = Cursor::new(html.as_bytes());
    let base = Url::parse(base_url).ok()?;
    let product = readability::extractor::extract(&mut cursor, &base).ok()?;
    let text = strip_tags(&product.content);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn strip_tags(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_title(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn extract_h1h2(doc: &Html) -> String {
    let Ok(sel) = Selector::parse("h1, h2") else {
        return String::new();
    };
    doc.select(&sel)
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_outlinks(doc: &Html, base_url: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let resolved = match &base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Url::parse(href).ok().map(|u| u.to_string()),
        };
        if let Some(url) = resolved.and_then(|u| canonicalize_url(&u)) {
            out.push(url);
        }
    }
    out
}

/// Detect language on the first 1000 body characters; `"unknown"` on
/// failure (spec §4.1).
fn detect_language(body: &str) -> String {
    let prefix: String = body.chars().take(LANG_DETECT_PREFIX_CHARS).collect();
    whatlang::detect(&prefix)
        .map(|info| info.lang().code().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u16, url: &str, html: &str) -> RawCrawlRecord {
        RawCrawlRecord {
            url: url.to_string(),
            status,
            title: None,
            html: html.to_string(),
            fetched_at: "2026-01-01T00:00:00Z".to_string(),
            content_type: Some("text/html".to_string()),
            outlinks: Vec::new(),
        }
    }

    #[test]
    fn drops_missing_url() {
        let mut r = record(200, "", "<p>hi</p>");
        r.url = String::new();
        assert!(normalize(&r).is_none());
    }

    #[test]
    fn drops_error_status() {
        let r = record(404, "https://x/y", "<p>hi</p>");
        assert!(normalize(&r).is_none());
    }

    #[test]
    fn drops_empty_body() {
        let r = record(200, "https://x/y", "<html><body></body></html>");
        assert!(normalize(&r).is_none());
    }

    #[test]
    fn extracts_headings_and_language() {
        let html = "<html><body><h1>Intro</h1><h2>Details</h2><p>This is a reasonably long piece of English text used for language detection purposes.</p></body></html>";
        let r = record(200, "https://x/y", html);
        let doc = normalize(&r).expect("should normalize");
        assert!(doc.h1h2.contains("Intro"));
        assert!(doc.h1h2.contains("Details"));
        assert_eq!(doc.lang, "eng");
    }

    #[test]
    fn batch_dedup_last_wins() {
        let records = vec![
            record(200, "https://x/y", "<p>first version of the body text</p>"),
            record(200, "https://x/y", "<p>second version of the body text</p>"),
        ];
        let docs = normalize_batch(&records);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].body.contains("second"));
    }

    #[test]
    fn canonicalize_lowercases_scheme_and_host() {
        assert_eq!(
            canonicalize_url("HTTP://Example.COM/About").unwrap(),
            "http://example.com/About"
        );
    }

    #[test]
    fn canonicalize_strips_default_ports() {
        assert_eq!(canonicalize_url("https://example.com:443/").unwrap(), "https://example.com/");
        assert_eq!(canonicalize_url("http://example.com:80/x").unwrap(), "http://example.com/x");
        assert_eq!(
            canonicalize_url("https://example.com:8443/x").unwrap(),
            "https://example.com:8443/x"
        );
    }

    #[test]
    fn canonicalize_resolves_dot_segments() {
        assert_eq!(
            canonicalize_url("https://example.com/a/../b/./c").unwrap(),
            "https://example.com/b/c"
        );
    }

    #[test]
    fn canonicalize_sorts_query_keys_and_drops_fragment() {
        assert_eq!(
            canonicalize_url("https://example.com/page/?b=2&a=1#section").unwrap(),
            "https://example.com/page?a=1&b=2"
        );
    }

    #[test]
    fn canonicalize_strips_trailing_slash_except_root() {
        assert_eq!(canonicalize_url("https://example.com/x/").unwrap(), "https://example.com/x");
        assert_eq!(canonicalize_url("https://example.com/").unwrap(), "https://example.com/");
    }

    #[test]
    fn canonicalize_rejects_non_http_schemes() {
        assert_eq!(canonicalize_url("javascript:alert(1)"), None);
        assert_eq!(canonicalize_url("ftp://example.com/x"), None);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let inputs = [
            "HTTP://Example.COM:80/a/../b/?b=2&a=1#frag",
            "https://example.com/x/",
            "https://example.com/",
            "https://example.com:443/page?z=1&a=2",
        ];
        for raw in inputs {
            let once = canonicalize_url(raw).unwrap();
            let twice = canonicalize_url(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn normalize_populates_canonical_url_only_when_it_differs() {
        let r = record(200, "HTTP://Example.COM/About/", "<p>hello there world</p>");
        let doc = normalize(&r).expect("should normalize");
        assert_eq!(doc.url, "http://example.com/About");
        assert_eq!(doc.canonical_url.as_deref(), Some("HTTP://Example.COM/About/"));

        let r = record(200, "https://example.com/y", "<p>hello there world</p>");
        let doc = normalize(&r).expect("should normalize");
        assert_eq!(doc.url, "https://example.com/y");
        assert_eq!(doc.canonical_url, None);
    }
}
