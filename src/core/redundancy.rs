//! Redundancy Checker: is a candidate a near-repeat of recent turns?
//!
//! Cosine similarity of embeddings against a trailing window; the max decides.
//! Committed turns are embedded once (`remember`) and served from cache.
//! Without a working embedder the score is lexical Jaccard overlap.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::RedundancyConfig;
use crate::core::embedding::{cosine, lexical_similarity, Embedder};
use crate::error::EmbedError;
use crate::types::{RedundancyVerdict, SimilarityMethod, Turn};

/// Redundancy checker with a per-turn embedding cache
pub struct RedundancyChecker {
    embedder: Arc<dyn Embedder>,
    config: RedundancyConfig,
    cache: HashMap<u64, Vec<f32>>,
}

impl std::fmt::Debug for RedundancyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundancyChecker")
            .field("embedder", &self.embedder.name())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl RedundancyChecker {
    pub fn new(embedder: Arc<dyn Embedder>, config: RedundancyConfig) -> Self {
        Self {
            embedder,
            config,
            cache: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Size of the trailing window
    pub fn window(&self) -> usize {
        self.config.window
    }

    pub fn cached(&self, index: u64) -> bool {
        self.cache.contains_key(&index)
    }

    /// Embed a committed turn and cache it. Failures leave the cache untouched.
    pub async fn remember(&mut self, turn: &Turn) {
        if self.cache.contains_key(&turn.index) {
            return;
        }
        match self.embedder.embed(&turn.text).await {
            Ok(vector) if !vector.is_empty() => {
                self.cache.insert(turn.index, vector);
            }
            Ok(_) => debug!(turn = turn.index, "empty embedding, not cached"),
            Err(e) => debug!(turn = turn.index, error = %e, "embedding failed, not cached"),
        }
    }

    /// Cache an embedding already computed for committed turn `index`
    pub fn cache_embedding(&mut self, index: u64, vector: Vec<f32>) {
        if !vector.is_empty() {
            self.cache.insert(index, vector);
        }
    }

    /// Embed a draft once, for scoring and topic fallback alike.
    /// `None` when the embedder cannot.
    pub async fn embed_candidate(&self, candidate: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(candidate).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                debug!("empty candidate embedding");
                None
            }
            Err(e) => {
                debug!(error = %e, "candidate embedding failed");
                None
            }
        }
    }

    /// Score a candidate against recent turns
    pub async fn is_redundant(&self, candidate: &str, recent: &[&Turn]) -> RedundancyVerdict {
        if recent.is_empty() {
            return RedundancyVerdict::empty();
        }
        let vector = self.embed_candidate(candidate).await;
        self.is_redundant_with(candidate, vector.as_deref(), recent).await
    }

    /// Score with the candidate's embedding already in hand. `None` scores
    /// lexically.
    pub async fn is_redundant_with(
        &self,
        candidate: &str,
        vector: Option<&[f32]>,
        recent: &[&Turn],
    ) -> RedundancyVerdict {
        if recent.is_empty() {
            return RedundancyVerdict::empty();
        }

        let scores = match vector {
            Some(vector) => self.embedding_scores(candidate, vector, recent).await,
            None => recent
                .iter()
                .map(|t| (t.index, lexical_similarity(candidate, &t.text), SimilarityMethod::Lexical))
                .collect(),
        };

        let (closest, score, method) = scores
            .into_iter()
            .fold((None, 0.0f64, SimilarityMethod::None), |best, (index, score, method)| {
                if best.0.is_none() || score > best.1 {
                    (Some(index), score, method)
                } else {
                    best
                }
            });

        RedundancyVerdict {
            redundant: score >= self.config.threshold,
            score,
            closest_turn: closest,
            method,
        }
    }

    /// Cosine scores; turns missing from the cache are embedded on the spot
    async fn embedding_scores(
        &self,
        candidate: &str,
        vector: &[f32],
        recent: &[&Turn],
    ) -> Vec<(u64, f64, SimilarityMethod)> {
        let mut scores = Vec::with_capacity(recent.len());
        for turn in recent {
            let score = match self.cache.get(&turn.index) {
                Some(prior) => compare(candidate, vector, prior, turn),
                None => match self.embedder.embed(&turn.text).await {
                    Ok(prior) => compare(candidate, vector, &prior, turn),
                    Err(_) => (lexical_similarity(candidate, &turn.text), SimilarityMethod::Lexical),
                },
            };
            scores.push((turn.index, score.0, score.1));
        }
        scores
    }
}

/// Cosine when dimensions agree, lexical overlap otherwise
fn compare(candidate: &str, vector: &[f32], prior: &[f32], turn: &Turn) -> (f64, SimilarityMethod) {
    if prior.len() != vector.len() {
        let e = EmbedError::DimensionMismatch { expected: vector.len(), got: prior.len() };
        debug!(turn = turn.index, error = %e, "lexical redundancy for this turn");
        return (lexical_similarity(candidate, &turn.text), SimilarityMethod::Lexical);
    }
    (cosine(vector, prior), SimilarityMethod::Embedding)
}

// =============================================================================
// TESTS
// =============================================================================
