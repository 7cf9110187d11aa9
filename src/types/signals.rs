//! Detector outputs: entailment tags and redundancy verdicts

use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};

/// Kinds of forward-moving content
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntailmentTag {
    /// "if ... then", "therefore", "entails"
    Implication,
    /// "in practice", "for example", "applied to"
    Application,
    /// "fails when", "counterexample", "except when"
    Counterexample,
    /// "criterion for", "observable", "could test"
    Test,
}

impl EntailmentTag {
    pub const ALL: [EntailmentTag; 4] = [
        EntailmentTag::Implication,
        EntailmentTag::Application,
        EntailmentTag::Counterexample,
        EntailmentTag::Test,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Implication => "implication",
            Self::Application => "application",
            Self::Counterexample => "counterexample",
            Self::Test => "test",
        }
    }

    /// Parse from the snake_case code used in configuration files
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }
}

impl std::fmt::Display for EntailmentTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Entailment detection with per-tag hit counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntailmentReport {
    /// Tags with at least one pattern hit
    pub tags: BTreeSet<EntailmentTag>,
    /// Number of pattern matches per tag
    pub hits: BTreeMap<EntailmentTag, usize>,
}

impl EntailmentReport {
    pub fn has_entailment(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn total_hits(&self) -> usize {
        self.hits.values().sum()
    }
}

/// How a similarity score was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    /// Cosine similarity of embeddings
    Embedding,
    /// Jaccard overlap of content words (embedding backend unavailable)
    Lexical,
    /// Nothing to compare against
    None,
}

/// Result of a redundancy check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundancyVerdict {
    /// Max similarity >= threshold
    pub redundant: bool,
    /// Max similarity over the window (0.0 when the window is empty)
    pub score: f64,
    /// Index of the most similar prior turn
    pub closest_turn: Option<u64>,
    pub method: SimilarityMethod,
}

impl RedundancyVerdict {
    /// Verdict for an empty window: never redundant
    pub fn empty() -> Self {
        Self {
            redundant: false,
            score: 0.0,
            closest_turn: None,
            method: SimilarityMethod::None,
        }
    }
}
