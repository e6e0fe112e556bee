//! Vector Store (C5): durable `{doc_id -> chunks[], embeddings[]}` over
//! LanceDB, generalized from the teacher's single fixed `research_history`
//! table (`features::history::MemoryManager`) into the spec's chunked,
//! per-`doc_id`, upsert-replaces-all-chunks schema.

pub mod pending;

use std::sync::Arc;

use arrow_array::{
    types::Float32Type, Array, FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::error::{CoreError, EmbedderUnavailable};
use crate::core::types::IndexUpsertResponse;
use crate::embedder::EmbedderClient;
use crate::fingerprint::{self, SimHashIndex};

const TABLE_NAME: &str = "documents";
const CHUNK_SIZE_TOKENS: usize = 400;
const CHUNK_OVERLAP_TOKENS: usize = 40;
const SIMILARITY_THRESHOLD: f32 = 0.15;

pub struct TextChunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
}

/// Word-based chunker approximating a fixed token encoding (spec §3):
/// `chunk_size` default 400 tokens, `overlap` 40, empty chunks discarded.
pub fn chunk_text(text: &str) -> Vec<TextChunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start_word = 0usize;
    let mut char_cursor = 0usize;

    while start_word < words.len() {
        let end_word = (start_word + CHUNK_SIZE_TOKENS).min(words.len());
        let slice = &words[start_word..end_word];
        let chunk_text = slice.join(" ");
        if !chunk_text.is_empty() {
            let start = char_cursor;
            let end = start + chunk_text.len();
            chunks.push(TextChunk {
                text: chunk_text,
                start,
                end,
                token_count: slice.len(),
            });
            char_cursor = end + 1;
        }
        if end_word == words.len() {
            break;
        }
        start_word = end_word.saturating_sub(CHUNK_OVERLAP_TOKENS).max(start_word + 1);
    }
    chunks
}

pub struct VectorStore {
    table: Table,
    embedder: Arc<dyn EmbedderClient>,
    embedding_dim: usize,
    simhash_idx: tokio::sync::Mutex<SimHashIndex>,
    ledger: tokio::sync::Mutex<std::collections::HashMap<String, [u8; 32]>>,
}

fn sanitize_metadata(meta: Option<&std::collections::HashMap<String, String>>) -> String {
    match meta {
        Some(m) if !m.is_empty() => serde_json::to_string(m).unwrap_or_default(),
        _ => String::new(),
    }
}

impl VectorStore {
    pub async fn connect(
        uri: &str,
        embedder: Arc<dyn EmbedderClient>,
        simhash_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, CoreError> {
        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| CoreError::Fatal(format!("lancedb connect failed: {e}")))?;

        let embedding_dim = embedder.embedding_dim();
        let schema = Arc::new(document_schema(embedding_dim));

        let table = match db.open_table(TABLE_NAME).execute().await {
            Ok(table) => table,
            Err(lancedb::Error::TableNotFound { .. }) => db
                .create_empty_table(TABLE_NAME, schema.clone())
                .execute()
                .await
                .map_err(|e| CoreError::Fatal(format!("create table failed: {e}")))?,
            Err(e) => return Err(CoreError::Fatal(format!("open table failed: {e}"))),
        };

        if let Err(e) = table
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
        {
            tracing::debug!("lancedb create_index skipped: {e}");
        }

        Ok(Self {
            table,
            embedder,
            embedding_dim,
            simhash_idx: tokio::sync::Mutex::new(SimHashIndex::load(simhash_path)),
            ledger: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn doc_id_for_url(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `upsert_document` per spec §4.4's numbered contract.
    pub async fn upsert_document(
        &self,
        text: &str,
        url: Option<&str>,
        title: Option<&str>,
        metadata: Option<&std::collections::HashMap<String, String>>,
    ) -> Result<IndexUpsertResponse, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::invalid("upsert_document: empty text"));
        }

        let doc_id = url.map(Self::doc_id_for_url).unwrap_or_else(|| Uuid::new_v4().to_string());
        let content_hash = fingerprint::content_hash(title.unwrap_or_default(), "", text);
        let simhash = fingerprint::simhash64(text);

        {
            let idx = self.simhash_idx.lock().await;
            if let Some(dup) = idx.nearest(simhash) {
                if dup != doc_id {
                    return Ok(IndexUpsertResponse {
                        doc_id: doc_id.clone(),
                        chunks: 0,
                        dims: 0,
                        skipped: true,
                        duplicate_of: Some(dup.to_string()),
                        queued: false,
                    });
                }
            }
        }

        {
            let ledger = self.ledger.lock().await;
            if ledger.get(&doc_id) == Some(&content_hash) {
                return Ok(IndexUpsertResponse {
                    doc_id,
                    chunks: 0,
                    dims: self.embedding_dim,
                    skipped: true,
                    duplicate_of: None,
                    queued: false,
                });
            }
        }

        let chunks = chunk_text(text);
        if chunks.is_empty() {
            self.record_fingerprint(&doc_id, content_hash, simhash).await;
            return Ok(IndexUpsertResponse {
                doc_id,
                chunks: 0,
                dims: self.embedding_dim,
                skipped: false,
                duplicate_of: None,
                queued: false,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) => {
                self.replace_chunks(
                    &doc_id,
                    url,
                    title,
                    &content_hash,
                    &chunks,
                    &embeddings,
                    sanitize_metadata(metadata),
                )
                .await?;
                self.record_fingerprint(&doc_id, content_hash, simhash).await;
                Ok(IndexUpsertResponse {
                    doc_id,
                    chunks: chunks.len(),
                    dims: self.embedding_dim,
                    skipped: false,
                    duplicate_of: None,
                    queued: false,
                })
            }
            Err(EmbedderUnavailable { .. }) => Ok(IndexUpsertResponse {
                doc_id,
                chunks: 0,
                dims: 0,
                skipped: false,
                duplicate_of: None,
                queued: true,
            }),
        }
    }

    async fn record_fingerprint(&self, doc_id: &str, content_hash: [u8; 32], simhash: u64) {
        self.ledger.lock().await.insert(doc_id.to_string(), content_hash);
        self.simhash_idx.lock().await.update(doc_id, simhash);
        let _ = self.simhash_idx.lock().await.persist();
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        url: Option<&str>,
        title: Option<&str>,
        content_hash: &[u8; 32],
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        metadata_json: String,
    ) -> Result<(), CoreError> {
        self.table
            .delete(&format!("doc_id = '{}'", escape(doc_id)))
            .await
            .map_err(|e| CoreError::Fatal(format!("delete prior chunks failed: {e}")))?;

        let batch = self.chunks_to_record_batch(
            doc_id,
            url,
            title,
            content_hash,
            chunks,
            embeddings,
            &metadata_json,
        )?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema);
        self.table
            .add(batches)
            .execute()
            .await
            .map_err(|e| CoreError::Fatal(format!("add chunks failed: {e}")))?;
        Ok(())
    }

    fn chunks_to_record_batch(
        &self,
        doc_id: &str,
        url: Option<&str>,
        title: Option<&str>,
        content_hash: &[u8; 32],
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
        metadata_json: &str,
    ) -> Result<RecordBatch, CoreError> {
        let n = chunks.len();
        let schema = Arc::new(document_schema(self.embedding_dim));
        let dim: i32 = self
            .embedding_dim
            .try_into()
            .map_err(|_| CoreError::Fatal("embedding dim too large".into()))?;

        let doc_id_arr = StringArray::from(vec![doc_id.to_string(); n]);
        let url_arr = StringArray::from(vec![url.unwrap_or_default().to_string(); n]);
        let title_arr = StringArray::from(vec![title.unwrap_or_default().to_string(); n]);
        let content_hash_hex = hex::encode(content_hash);
        let hash_arr = StringArray::from(vec![content_hash_hex; n]);
        let meta_arr = StringArray::from(vec![metadata_json.to_string(); n]);
        let text_arr = StringArray::from(chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>());
        let start_arr = Int64Array::from(chunks.iter().map(|c| c.start as i64).collect::<Vec<_>>());
        let end_arr = Int64Array::from(chunks.iter().map(|c| c.end as i64).collect::<Vec<_>>());
        let token_count_arr =
            Int64Array::from(chunks.iter().map(|c| c.token_count as i64).collect::<Vec<_>>());

        let vector = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            embeddings
                .iter()
                .map(|e| Some(e.iter().map(|v| Some(*v)).collect::<Vec<_>>())),
            dim,
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(doc_id_arr),
                Arc::new(url_arr),
                Arc::new(title_arr),
                Arc::new(hash_arr),
                Arc::new(text_arr),
                Arc::new(start_arr),
                Arc::new(end_arr),
                Arc::new(token_count_arr),
                Arc::new(meta_arr),
                Arc::new(vector),
            ],
        )
        .map_err(|e| CoreError::Fatal(format!("record batch build failed: {e}")))
    }

    /// Embeds a single string through the configured backend, for callers
    /// (query embedding storage, similarity-seeded discovery) that need the
    /// raw vector rather than a search result.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderUnavailable> {
        let embeddings = self.embedder.embed_batch(&[text.to_string()]).await?;
        Ok(embeddings.into_iter().next().unwrap_or_default())
    }

    /// `search(query, k, filters?)` per spec §4.4.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&std::collections::HashMap<String, String>>,
    ) -> Result<Vec<(String, String, String, f64)>, CoreError> {
        let query_vec = self
            .embed_query(query)
            .await
            .map_err(|e| CoreError::TransientUpstream(e.detail))?;
        if query_vec.is_empty() {
            return Ok(Vec::new());
        }

        let mut q = self
            .table
            .query()
            .nearest_to(query_vec.as_slice())
            .map_err(|e| CoreError::Fatal(format!("vector query build failed: {e}")))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);

        if let Some(filters) = filters {
            for (key, value) in filters.iter().filter(|(_, v)| !v.is_empty()) {
                q = q.only_if(format!("{} = '{}'", escape(key), escape(value)));
            }
        }

        let stream = q
            .execute()
            .await
            .map_err(|e| CoreError::Fatal(format!("vector search failed: {e}")))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| CoreError::Fatal(format!("vector stream read failed: {e}")))?;

        let mut hits = Vec::new();
        for batch in batches {
            let urls = column_str(&batch, "url");
            let titles = column_str(&batch, "title");
            let texts = column_str(&batch, "text");
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<arrow_array::Float32Array>().cloned());
            for i in 0..batch.num_rows() {
                let similarity = distances
                    .as_ref()
                    .map(|d| 1.0 - d.value(i))
                    .unwrap_or(0.0);
                if similarity < SIMILARITY_THRESHOLD {
                    continue;
                }
                hits.push((
                    urls.get(i).cloned().unwrap_or_default(),
                    titles.get(i).cloned().unwrap_or_default(),
                    texts.get(i).cloned().unwrap_or_default(),
                    similarity as f64,
                ));
            }
        }
        hits.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

fn document_schema(embedding_dim: usize) -> Schema {
    let dim: i32 = embedding_dim.try_into().unwrap_or(256);
    Schema::new(vec![
        Field::new("doc_id", DataType::Utf8, false),
        Field::new("url", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("start", DataType::Int64, false),
        Field::new("end", DataType::Int64, false),
        Field::new("token_count", DataType::Int64, false),
        Field::new("metadata", DataType::Utf8, true),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            true,
        ),
    ])
}

fn column_str(batch: &RecordBatch, name: &str) -> Vec<String> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|arr| (0..arr.len()).map(|i| arr.value(i).to_string()).collect())
        .unwrap_or_default()
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_discards_empty_input() {
        assert!(chunk_text("").is_empty());
    }

    #[test]
    fn chunking_produces_overlapping_windows() {
        let words: Vec<String> = (0..1000).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.token_count <= CHUNK_SIZE_TOKENS));
    }

    #[test]
    fn doc_id_for_url_is_deterministic() {
        let a = VectorStore::doc_id_for_url("https://example.com");
        let b = VectorStore::doc_id_for_url("https://example.com");
        assert_eq!(a, b);
    }
}
