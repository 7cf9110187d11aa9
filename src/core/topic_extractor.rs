//! Topic Extractor: free text → recognized concept labels
//!
//! Keyword lookup first. When keyword hits fall below the configured minimum,
//! the text is embedded and compared against precomputed seed-phrase
//! embeddings. Embedding failures silently degrade to keyword-only.

use std::collections::BTreeSet;
use std::sync::Arc;
use regex::Regex;
use tracing::debug;

use crate::config::{TensionCatalog, TopicConfig};
use crate::core::embedding::{cosine, Embedder};
use crate::error::ConfigError;
use crate::types::TopicLabel;

#[derive(Debug, Clone)]
struct TopicMatcher {
    label: TopicLabel,
    keywords: Option<Regex>,
}

/// Topic extractor over a fixed catalog
pub struct TopicExtractor {
    matchers: Vec<TopicMatcher>,
    embedder: Option<Arc<dyn Embedder>>,
    /// (label, seed embedding); empty when no embedder or seeding failed
    seeds: Vec<(TopicLabel, Vec<f32>)>,
    config: TopicConfig,
}

impl std::fmt::Debug for TopicExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicExtractor")
            .field("topics", &self.matchers.iter().map(|m| &m.label).collect::<Vec<_>>())
            .field("embedder", &self.embedder.as_ref().map(|e| e.name()))
            .field("seeds", &self.seeds.len())
            .finish()
    }
}

impl TopicExtractor {
    /// Keyword-only extractor
    pub fn keyword_only(catalog: &TensionCatalog, config: TopicConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            matchers: compile_matchers(catalog)?,
            embedder: None,
            seeds: Vec::new(),
            config,
        })
    }

    /// Extractor with semantic fallback; seed phrases are embedded once here
    pub async fn build(
        catalog: &TensionCatalog,
        config: TopicConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        let mut extractor = Self::keyword_only(catalog, config)?;

        let mut seeds = Vec::new();
        'topics: for topic in &catalog.topics {
            for phrase in &topic.seeds {
                match embedder.embed(phrase).await {
                    Ok(vector) if !vector.is_empty() => seeds.push((topic.label.clone(), vector)),
                    Ok(_) => {
                        debug!(embedder = embedder.name(), "empty seed embedding, keyword-only topics");
                        seeds.clear();
                        break 'topics;
                    }
                    Err(e) => {
                        debug!(embedder = embedder.name(), error = %e, "seed embedding failed, keyword-only topics");
                        seeds.clear();
                        break 'topics;
                    }
                }
            }
        }

        extractor.seeds = seeds;
        extractor.embedder = Some(embedder);
        Ok(extractor)
    }

    /// Whether the semantic fallback is usable
    pub fn has_semantic_fallback(&self) -> bool {
        self.embedder.is_some() && !self.seeds.is_empty()
    }

    /// Keyword matches and total hit count
    pub fn keyword_topics(&self, text: &str) -> (BTreeSet<TopicLabel>, usize) {
        let mut topics = BTreeSet::new();
        let mut hits = 0;
        for matcher in &self.matchers {
            if let Some(re) = &matcher.keywords {
                let count = re.find_iter(text).count();
                if count > 0 {
                    topics.insert(matcher.label.clone());
                    hits += count;
                }
            }
        }
        (topics, hits)
    }

    /// Whether extraction would embed `text`: keyword hits below the minimum
    /// and a usable semantic fallback
    pub fn needs_fallback(&self, text: &str) -> bool {
        let text = text.trim();
        !text.is_empty()
            && self.has_semantic_fallback()
            && self.keyword_topics(text).1 < self.config.min_keyword_hits
    }

    /// Extract topic labels. Never fails.
    pub async fn extract(&self, text: &str) -> BTreeSet<TopicLabel> {
        if !self.needs_fallback(text) {
            return self.keyword_topics(text.trim()).0;
        }
        let Some(embedder) = &self.embedder else {
            return self.keyword_topics(text.trim()).0;
        };
        match embedder.embed(text.trim()).await {
            Ok(vector) if !vector.is_empty() => self.extract_with(text, Some(&vector)),
            Ok(_) => {
                debug!("empty text embedding, keyword-only topics");
                self.extract_with(text, None)
            }
            Err(e) => {
                debug!(error = %e, "text embedding failed, keyword-only topics");
                self.extract_with(text, None)
            }
        }
    }

    /// Extract with an already computed embedding of `text`. `None` or a
    /// keyword hit count at the minimum gives keyword topics only.
    pub fn extract_with(&self, text: &str, vector: Option<&[f32]>) -> BTreeSet<TopicLabel> {
        let text = text.trim();
        if text.is_empty() {
            return BTreeSet::new();
        }
        let (mut topics, hits) = self.keyword_topics(text);
        if hits >= self.config.min_keyword_hits {
            return topics;
        }
        let Some(vector) = vector.filter(|v| !v.is_empty()) else {
            return topics;
        };
        for (label, seed) in &self.seeds {
            if cosine(vector, seed) >= self.config.semantic_threshold {
                topics.insert(label.clone());
            }
        }
        topics
    }
}

fn compile_matchers(catalog: &TensionCatalog) -> Result<Vec<TopicMatcher>, ConfigError> {
    catalog
        .topics
        .iter()
        .map(|topic| {
            let alternatives: Vec<String> = topic
                .keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(|k| regex::escape(k).replace(' ', r"\s+"))
                .collect();
            let keywords = if alternatives.is_empty() {
                None
            } else {
                let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
                Some(Regex::new(&pattern).map_err(|source| ConfigError::InvalidPattern {
                    tag: topic.label.clone(),
                    pattern,
                    source,
                })?)
            };
            Ok(TopicMatcher { label: topic.label.clone(), keywords })
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
