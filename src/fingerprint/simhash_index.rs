//! Persistent SimHash index (C3): `{url -> 64-bit simhash}`, linear-scan
//! nearest-by-Hamming lookup. The spec calls for `O(n)` `nearest()` with
//! insertion-stable ordering, so unlike `StractOrg-stract`'s blocked-Hamming
//! `Table`/`Block` index (built for web-scale corpora) this keeps the
//! straightforward map + linear scan the spec describes; we borrow only the
//! idea of an insertion-ordered store, not the blocking scheme itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fingerprint::{hamming_distance, NEAR_DUPLICATE_THRESHOLD};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Entry {
    url: String,
    simhash: u64,
}

/// In-memory, JSON-persisted map of `url -> simhash` with insertion-stable
/// iteration order, matching `nearest()`'s "first url within threshold"
/// contract (spec §4.2).
#[derive(Debug, Default)]
pub struct SimHashIndex {
    path: Option<PathBuf>,
    order: Vec<String>,
    by_url: HashMap<String, u64>,
}

impl SimHashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing or unreadable file is treated as an
    /// empty index (spec §7, state corruption recovers as empty).
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut idx = Self {
            path: Some(path.clone()),
            order: Vec::new(),
            by_url: HashMap::new(),
        };
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(entries) = serde_json::from_slice::<Vec<Entry>>(&bytes) {
                for e in entries {
                    idx.order.push(e.url.clone());
                    idx.by_url.insert(e.url, e.simhash);
                }
            } else {
                tracing::error!(path = %path.display(), "simhash index file unreadable, starting empty");
            }
        }
        idx
    }

    pub fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries: Vec<Entry> = self
            .order
            .iter()
            .filter_map(|url| {
                self.by_url.get(url).map(|sh| Entry {
                    url: url.clone(),
                    simhash: *sh,
                })
            })
            .collect();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&entries)?)
    }

    /// First url (in insertion order) whose stored signature is within
    /// `NEAR_DUPLICATE_THRESHOLD` Hamming distance of `sig`.
    pub fn nearest(&self, sig: u64) -> Option<&str> {
        self.order.iter().find_map(|url| {
            let stored = self.by_url.get(url)?;
            if hamming_distance(*stored, sig) <= NEAR_DUPLICATE_THRESHOLD {
                Some(url.as_str())
            } else {
                None
            }
        })
    }

    /// Overwrites (or inserts) `url`'s signature.
    pub fn update(&mut self, url: &str, sig: u64) {
        if !self.by_url.contains_key(url) {
            self.order.push(url.to_string());
        }
        self.by_url.insert(url.to_string(), sig);
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_finds_first_within_threshold_in_insertion_order() {
        let mut idx = SimHashIndex::new();
        idx.update("https://a", 0b0000);
        idx.update("https://b", 0b0001);
        assert_eq!(idx.nearest(0b0000), Some("https://a"));
    }

    #[test]
    fn nearest_none_when_out_of_threshold() {
        let mut idx = SimHashIndex::new();
        idx.update("https://a", 0xFFFF_FFFF_FFFF_FFFFu64);
        assert_eq!(idx.nearest(0), None);
    }

    #[test]
    fn update_overwrites_existing_entry() {
        let mut idx = SimHashIndex::new();
        idx.update("https://a", 1);
        idx.update("https://a", 2);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.nearest(2), Some("https://a"));
    }

    #[test]
    fn persist_and_reload_roundtrip() {
        let dir = std::env::temp_dir().join(format!("simhash-test-{}", std::process::id()));
        let path = dir.join("simhash_index.json");
        let mut idx = SimHashIndex::load(&path);
        idx.update("https://a", 42);
        idx.persist().unwrap();

        let reloaded = SimHashIndex::load(&path);
        assert_eq!(reloaded.nearest(42), Some("https://a"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
