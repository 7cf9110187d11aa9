//! Embedding port and built-in providers
//!
//! The engine only needs `embed(text) -> vector`. Providers that cannot serve
//! a request return `EmbedError`; callers degrade to lexical matching.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::EmbedError;

lazy_static! {
    static ref RE_WORD: Regex = Regex::new(r"[\p{L}\p{N}']+").unwrap();
}

/// Function words ignored by lexical similarity and feature hashing
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "by", "for",
    "with", "is", "are", "was", "were", "be", "been", "it", "its", "this", "that",
    "as", "we", "i", "you", "they", "he", "she", "not", "no", "so", "do", "does",
];

/// Text-to-vector provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider name for diagnostics
    fn name(&self) -> &'static str;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Provider that is never available: forces keyword-only behaviour
#[derive(Debug, Clone, Default)]
pub struct NullEmbedder;

impl NullEmbedder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Unavailable("null embedder".to_string()))
    }
}

/// Deterministic bag-of-words embedding via feature hashing
///
/// Each content word is hashed (SHA-256) into one of `dimension` buckets with
/// a sign bit; the result is L2-normalised. No model server needed.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in content_words(text) {
            let hash = Sha256::digest(word.as_bytes());
            let bucket = u64::from_le_bytes([
                hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
            ]) as usize % self.dimension;
            let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }
}

/// Lowercased words minus stopwords
pub fn content_words(text: &str) -> Vec<String> {
    RE_WORD
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Cosine similarity; 0.0 for empty, zero-norm or mismatched vectors
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}

/// Jaccard overlap of content-word sets
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let wa: HashSet<String> = content_words(a).into_iter().collect();
    let wb: HashSet<String> = content_words(b).into_iter().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    intersection as f64 / union as f64
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

// =============================================================================
// TESTS
// =============================================================================
