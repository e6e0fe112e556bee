//! Content fingerprinting (C2): canonical content hash + 64-bit SimHash.

pub mod simhash_index;

use blake2::digest::{Digest, VariableOutput};
use blake2::Blake2bVar;
use sha2::Sha256;

use crate::core::types::ContentFingerprint;

pub use simhash_index::SimHashIndex;

/// `content_hash = SHA-256(title ‖ 0x01 ‖ h1h2 ‖ 0x01 ‖ body)` (spec §3).
pub fn content_hash(title: &str, h1h2: &str, body: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x01]);
    hasher.update(h1h2.as_bytes());
    hasher.update([0x01]);
    hasher.update(body.as_bytes());
    hasher.finalize().into()
}

pub fn content_hash_hex(title: &str, h1h2: &str, body: &str) -> String {
    hex::encode(content_hash(title, h1h2, body))
}

/// Lowercased alphanumeric tokens, matching the tokenization the spec's
/// SimHash and discovery-keyword-set steps both rely on.
pub fn tokenize_alnum(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Per-token 64-bit Blake2b digest, truncated/interpreted as a u64 for the
/// SimHash accumulator (spec §3: "per-token Blake2b-64 bits").
fn token_bits(token: &str) -> u64 {
    use blake2::digest::Update;
    let mut hasher = Blake2bVar::new(8).expect("8-byte blake2b output is valid");
    hasher.update(token.as_bytes());
    let mut out = [0u8; 8];
    hasher.finalize_variable(&mut out).expect("fixed 8-byte buffer");
    u64::from_le_bytes(out)
}

/// 64-bit SimHash over lowercased alphanumeric tokens of `body` (spec §3):
/// a signed accumulator per bit position, incremented/decremented by each
/// token's corresponding Blake2b-64 bit, with bit `i` of the result set iff
/// `accumulator[i] >= 0`.
pub fn simhash64(body: &str) -> u64 {
    let mut acc = [0i64; 64];
    for token in tokenize_alnum(body) {
        let bits = token_bits(&token);
        for (i, a) in acc.iter_mut().enumerate() {
            if (bits >> i) & 1 == 1 {
                *a += 1;
            } else {
                *a -= 1;
            }
        }
    }
    let mut result: u64 = 0;
    for (i, a) in acc.iter().enumerate() {
        if *a >= 0 {
            result |= 1 << i;
        }
    }
    result
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub const NEAR_DUPLICATE_THRESHOLD: u32 = 3;

pub fn fingerprint(title: &str, h1h2: &str, body: &str) -> ContentFingerprint {
    ContentFingerprint {
        content_hash: content_hash(title, h1h2, body),
        simhash: simhash64(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bodies_are_identical_simhash() {
        let a = simhash64("alpha beta gamma delta epsilon");
        let b = simhash64("alpha beta gamma delta epsilon");
        assert_eq!(a, b);
        assert_eq!(hamming_distance(a, b), 0);
    }

    #[test]
    fn near_duplicate_detection_threshold() {
        let a = simhash64("the quick brown fox jumps over the lazy dog");
        let b = simhash64("the quick brown fox jumps over the lazy cat");
        // Small edits should usually stay within a small Hamming distance;
        // this is a smoke test on the accumulator, not a formal proof.
        assert!(hamming_distance(a, b) < 32);
    }

    #[test]
    fn content_hash_is_order_sensitive_to_fields() {
        let h1 = content_hash_hex("Title", "H1", "Body");
        let h2 = content_hash_hex("Title", "H1", "Body2");
        assert_ne!(h1, h2);
    }

    #[test]
    fn content_hash_is_deterministic() {
        let h1 = content_hash_hex("Title", "H1", "Body");
        let h2 = content_hash_hex("Title", "H1", "Body");
        assert_eq!(h1, h2);
    }
}
