//! Keyword Index (C4): tantivy-backed inverted index over
//! `{url, lang, title, h1h2, body}` with stemming and field boosts, plus
//! the content-hash ledger + SimHash guard that makes `incremental_index`
//! idempotent (spec §4.3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, PhraseQuery, QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, STORED, STRING,
};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, Stemmer, TextAnalyzer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::core::error::CoreError;
use crate::core::types::Document;
use crate::fingerprint::{self, SimHashIndex};

const TOKENIZER_NAME: &str = "focusengine_stem";
const REQUIRED_FIELDS: &[&str] = &["url", "lang", "title", "h1h2", "body", "domain"];

const TITLE_BOOST: f32 = 4.0;
const H1H2_BOOST: f32 = 2.0;
const BODY_BOOST: f32 = 1.0;

#[derive(Clone)]
struct Fields {
    url: Field,
    lang: Field,
    title: Field,
    h1h2: Field,
    body: Field,
    domain: Field,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub added: usize,
    pub skipped: usize,
    pub deduped: usize,
}

pub struct SearchOptions {
    pub site: Option<String>,
    pub in_title: bool,
    pub page: usize,
    pub per_page: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            site: None,
            in_title: false,
            page: 0,
            per_page: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordHit {
    pub url: String,
    pub title: String,
    pub h1h2: String,
    pub body: String,
    pub domain: Option<String>,
    pub score: f64,
}

pub struct KeywordIndex {
    index: Index,
    fields: Fields,
    reader: IndexReader,
    writer: RwLock<IndexWriter>,
    dir: PathBuf,
    ledger_path: PathBuf,
    simhash_path: PathBuf,
    ledger: RwLock<HashMap<String, String>>,
    simhash_idx: RwLock<SimHashIndex>,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();

    let stemmed = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );

    let url = builder.add_text_field("url", STRING | STORED | FAST);
    let lang = builder.add_text_field("lang", STRING | STORED);
    let title = builder.add_text_field("title", stemmed.clone() | STORED);
    let h1h2 = builder.add_text_field("h1h2", stemmed.clone() | STORED);
    let body = builder.add_text_field("body", stemmed | STORED);
    let domain = builder.add_text_field("domain", STRING | STORED | FAST);

    let schema = builder.build();
    (
        schema,
        Fields {
            url,
            lang,
            title,
            h1h2,
            body,
            domain,
        },
    )
}

fn register_tokenizer(index: &Index) {
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(TOKENIZER_NAME, analyzer);
}

fn schema_has_required_fields(schema: &Schema) -> bool {
    REQUIRED_FIELDS.iter().all(|f| schema.get_field(f).is_ok())
}

impl KeywordIndex {
    /// `ensure_index(dir)`: opens the index, rebuilding it empty if the
    /// on-disk schema is missing any `REQUIRED_FIELDS` (spec §4.3 "Schema
    /// upgrade"), or if segment files are missing/corrupt (spec §4.3
    /// "Recovery": treated as empty, never half-open).
    pub fn ensure_index(dir: impl AsRef<Path>) -> Result<Self, CoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::Fatal(format!("cannot create index dir: {e}")))?;

        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(&dir)
            .map_err(|e| CoreError::StateCorruption(format!("cannot open index dir: {e}")))?;

        let index = match Index::open_or_create(mmap_dir, schema.clone()) {
            Ok(index) if schema_has_required_fields(&index.schema()) => index,
            _ => {
                tracing::warn!(dir = %dir.display(), "index schema outdated or unreadable, rebuilding empty");
                for entry in std::fs::read_dir(&dir).into_iter().flatten().flatten() {
                    let _ = std::fs::remove_file(entry.path());
                }
                let mmap_dir = tantivy::directory::MmapDirectory::open(&dir)
                    .map_err(|e| CoreError::Fatal(format!("cannot reopen index dir: {e}")))?;
                Index::create(mmap_dir, schema, tantivy::IndexSettings::default())
                    .map_err(|e| CoreError::Fatal(format!("cannot recreate index: {e}")))?
            }
        };

        register_tokenizer(&index);

        let writer = index
            .writer(64_000_000)
            .map_err(|e| CoreError::Fatal(format!("cannot open index writer: {e}")))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| CoreError::Fatal(format!("cannot open index reader: {e}")))?;

        let ledger_path = dir.join("ledger.json");
        let simhash_path = dir.join("simhash.json");

        let ledger = load_ledger(&ledger_path);
        let simhash_idx = SimHashIndex::load(&simhash_path);

        Ok(Self {
            index,
            fields,
            reader,
            writer: RwLock::new(writer),
            dir,
            ledger_path,
            simhash_path,
            ledger: RwLock::new(ledger),
            simhash_idx: RwLock::new(simhash_idx),
        })
    }

    /// `upsert(doc)`: add/replace one document by `url` without committing.
    pub fn upsert(&self, document: &Document) -> Result<(), CoreError> {
        let writer = self
            .writer
            .write()
            .map_err(|_| CoreError::Fatal("index writer lock poisoned".into()))?;
        let domain = url_domain(&document.url);
        let term = Term::from_field_text(self.fields.url, &document.url);
        writer.delete_term(term);
        writer
            .add_document(doc!(
                self.fields.url => document.url.clone(),
                self.fields.lang => document.lang.clone(),
                self.fields.title => document.title.clone(),
                self.fields.h1h2 => document.h1h2.clone(),
                self.fields.body => document.body.clone(),
                self.fields.domain => domain.unwrap_or_default(),
            ))
            .map_err(|e| CoreError::Fatal(format!("add_document failed: {e}")))?;
        Ok(())
    }

    pub fn commit(&self) -> Result<(), CoreError> {
        let mut writer = self
            .writer
            .write()
            .map_err(|_| CoreError::Fatal("index writer lock poisoned".into()))?;
        writer
            .commit()
            .map_err(|e| CoreError::Fatal(format!("commit failed: {e}")))?;
        Ok(())
    }

    /// Runs the incremental-index algorithm of spec §4.3 over a batch,
    /// persisting ledger/simhash and the `last_index_time` stamp.
    pub fn incremental_index(
        &self,
        docs: &[Document],
        last_index_time_path: &Path,
    ) -> Result<IndexStats, CoreError> {
        let mut stats = IndexStats::default();
        let mut ledger = self
            .ledger
            .write()
            .map_err(|_| CoreError::Fatal("ledger lock poisoned".into()))?;
        let mut simhash_idx = self
            .simhash_idx
            .write()
            .map_err(|_| CoreError::Fatal("simhash lock poisoned".into()))?;

        for document in docs {
            if document.url.trim().is_empty() || document.body.trim().is_empty() {
                stats.skipped += 1;
                continue;
            }
            let sig_hex = fingerprint::content_hash_hex(&document.title, &document.h1h2, &document.body);
            if ledger.get(&document.url) == Some(&sig_hex) {
                stats.skipped += 1;
                continue;
            }

            let sh = fingerprint::simhash64(&document.body);
            if let Some(dup_url) = simhash_idx.nearest(sh) {
                if dup_url != document.url {
                    ledger.insert(document.url.clone(), sig_hex);
                    stats.deduped += 1;
                    continue;
                }
            }

            self.upsert(document)?;
            ledger.insert(document.url.clone(), sig_hex);
            simhash_idx.update(&document.url, sh);
            stats.added += 1;
        }

        self.commit()?;
        persist_ledger(&self.ledger_path, &ledger)?;
        simhash_idx
            .persist()
            .map_err(|e| CoreError::Fatal(format!("persist simhash index: {e}")))?;
        write_last_index_time(last_index_time_path)?;

        Ok(stats)
    }

    /// `search(query, opts)`: default multifield over `{title, content}`
    /// with field boosts; `in_title` restricts to title; `site` filters by
    /// the stored `domain` field.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<KeywordHit>, CoreError> {
        let searcher = self.reader.searcher();

        let fields = if opts.in_title {
            vec![(self.fields.title, TITLE_BOOST)]
        } else {
            vec![
                (self.fields.title, TITLE_BOOST),
                (self.fields.h1h2, H1H2_BOOST),
                (self.fields.body, BODY_BOOST),
            ]
        };

        let mut parser = QueryParser::for_index(
            &self.index,
            fields.iter().map(|(f, _)| *f).collect(),
        );
        for (field, boost) in &fields {
            parser.set_field_boost(*field, *boost);
        }

        let parsed = parser
            .parse_query(query)
            .map_err(|e| CoreError::invalid(format!("bad query: {e}")))?;

        let final_query: Box<dyn tantivy::query::Query> = if let Some(site) = &opts.site {
            let site_term = Term::from_field_text(self.fields.domain, site);
            let site_query = TermQuery::new(site_term, IndexRecordOption::Basic);
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, parsed),
                (Occur::Must, Box::new(site_query)),
            ]))
        } else {
            parsed
        };

        let limit = opts.per_page;
        let offset = opts.page * opts.per_page;
        let top_docs = searcher
            .search(&final_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| CoreError::Fatal(format!("search failed: {e}")))?;

        let mut hits = Vec::new();
        for (score, addr) in top_docs.into_iter().skip(offset) {
            let retrieved = searcher
                .doc::<tantivy::TantivyDocument>(addr)
                .map_err(|e| CoreError::Fatal(format!("doc fetch failed: {e}")))?;
            hits.push(KeywordHit {
                url: get_text(&retrieved, self.fields.url),
                title: get_text(&retrieved, self.fields.title),
                h1h2: get_text(&retrieved, self.fields.h1h2),
                body: get_text(&retrieved, self.fields.body),
                domain: Some(get_text(&retrieved, self.fields.domain)).filter(|d| !d.is_empty()),
                score: score as f64,
            });
        }
        Ok(hits)
    }

    /// Phrase-query support required by spec §4.3.
    pub fn search_phrase(&self, phrase: &[&str]) -> Result<Vec<KeywordHit>, CoreError> {
        let searcher = self.reader.searcher();
        let terms: Vec<Term> = phrase
            .iter()
            .map(|t| Term::from_field_text(self.fields.body, t))
            .collect();
        if terms.len() < 2 {
            return Ok(Vec::new());
        }
        let query = PhraseQuery::new(terms);
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(20))
            .map_err(|e| CoreError::Fatal(format!("phrase search failed: {e}")))?;
        let mut hits = Vec::new();
        for (score, addr) in top_docs {
            let retrieved = searcher
                .doc::<tantivy::TantivyDocument>(addr)
                .map_err(|e| CoreError::Fatal(format!("doc fetch failed: {e}")))?;
            hits.push(KeywordHit {
                url: get_text(&retrieved, self.fields.url),
                title: get_text(&retrieved, self.fields.title),
                h1h2: get_text(&retrieved, self.fields.h1h2),
                body: get_text(&retrieved, self.fields.body),
                domain: Some(get_text(&retrieved, self.fields.domain)).filter(|d| !d.is_empty()),
                score: score as f64,
            });
        }
        Ok(hits)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn get_text(doc: &tantivy::TantivyDocument, field: Field) -> String {
    use tantivy::schema::document::Value;
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn url_domain(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string()))
}

fn load_ledger(path: &Path) -> HashMap<String, String> {
    std::fs::read(path)
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
        .unwrap_or_default()
}

fn persist_ledger(path: &Path, ledger: &HashMap<String, String>) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::Fatal(e.to_string()))?;
    }
    let bytes = serde_json::to_vec_pretty(ledger).map_err(|e| CoreError::Fatal(e.to_string()))?;
    std::fs::write(path, bytes).map_err(|e| CoreError::Fatal(e.to_string()))
}

fn write_last_index_time(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::Fatal(e.to_string()))?;
    }
    let now = chrono::Utc::now().timestamp();
    std::fs::write(path, now.to_string()).map_err(|e| CoreError::Fatal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(url: &str, title: &str, body: &str) -> Document {
        Document {
            url: url.to_string(),
            canonical_url: None,
            title: title.to_string(),
            h1h2: String::new(),
            body: body.to_string(),
            lang: "eng".to_string(),
            fetched_at: "2026-01-01T00:00:00Z".to_string(),
            outlinks: Vec::new(),
            status_code: 200,
            content_type: None,
        }
    }

    #[test]
    fn incremental_index_then_search_finds_unique_token() {
        let tmp = std::env::temp_dir().join(format!("kwidx-test-{}", uuid::Uuid::new_v4()));
        let idx = KeywordIndex::ensure_index(&tmp).unwrap();
        let stamp = tmp.join("last_index_time");
        let stats = idx
            .incremental_index(&[doc("https://x", "Packaging", "Install packages with pipzorg")], &stamp)
            .unwrap();
        assert_eq!(stats.added, 1);

        let hits = idx.search("pipzorg", &SearchOptions::default()).unwrap();
        assert_eq!(hits.first().map(|h| h.url.as_str()), Some("https://x"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn near_duplicate_body_across_urls_is_deduped() {
        let tmp = std::env::temp_dir().join(format!("kwidx-test-{}", uuid::Uuid::new_v4()));
        let idx = KeywordIndex::ensure_index(&tmp).unwrap();
        let stamp = tmp.join("last_index_time");
        let body = "the quick brown fox jumps over the lazy dog near the river bank";
        idx.incremental_index(&[doc("https://a/one", "A", body)], &stamp).unwrap();
        let second = idx
            .incremental_index(&[doc("https://b/two", "B", body)], &stamp)
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.deduped, 1);

        let hits = idx.search("lazy dog", &SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://a/one");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn idempotent_reindex_skips_unchanged() {
        let tmp = std::env::temp_dir().join(format!("kwidx-test-{}", uuid::Uuid::new_v4()));
        let idx = KeywordIndex::ensure_index(&tmp).unwrap();
        let stamp = tmp.join("last_index_time");
        let d = doc("https://x", "Title", "unique-body-marker one two three");
        idx.incremental_index(&[d.clone()], &stamp).unwrap();
        let second = idx.incremental_index(&[d], &stamp).unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.deduped, 0);
        assert!(second.skipped >= 1);
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
