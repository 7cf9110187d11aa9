//! Entailment Detector: lexical evidence of forward-moving content
//!
//! Four tags (implication, application, counterexample, test), each with a
//! list of trigger patterns. A tag is present if any of its patterns match.
//! Pure and stateless; false negatives are tolerated.

use std::collections::{BTreeMap, BTreeSet};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::EntailmentCatalog;
use crate::error::ConfigError;
use crate::types::{EntailmentReport, EntailmentTag};

lazy_static! {
    static ref BUILTIN: Vec<(EntailmentTag, Vec<Regex>)> =
        compile(&EntailmentCatalog::default()).unwrap();
}

/// Entailment detector over a compiled pattern catalog
#[derive(Debug, Clone)]
pub struct EntailmentDetector {
    patterns: Vec<(EntailmentTag, Vec<Regex>)>,
}

impl Default for EntailmentDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EntailmentDetector {
    /// Detector with the built-in patterns
    pub fn new() -> Self {
        Self { patterns: BUILTIN.clone() }
    }

    /// Detector with patterns from configuration
    pub fn from_catalog(catalog: &EntailmentCatalog) -> Result<Self, ConfigError> {
        Ok(Self { patterns: compile(catalog)? })
    }

    /// Tags with per-tag hit counts
    pub fn analyze(&self, text: &str) -> EntailmentReport {
        let text = text.trim();
        if text.is_empty() {
            return EntailmentReport::default();
        }

        let mut tags = BTreeSet::new();
        let mut hits = BTreeMap::new();
        for (tag, regexes) in &self.patterns {
            let count: usize = regexes.iter().map(|re| re.find_iter(text).count()).sum();
            if count > 0 {
                tags.insert(*tag);
                hits.insert(*tag, count);
            }
        }

        EntailmentReport { tags, hits }
    }

    /// Tag set only
    pub fn detect(&self, text: &str) -> BTreeSet<EntailmentTag> {
        self.analyze(text).tags
    }

    /// True iff at least one tag is present
    pub fn has_entailment(&self, text: &str) -> bool {
        let text = text.trim();
        self.patterns
            .iter()
            .any(|(_, regexes)| regexes.iter().any(|re| re.is_match(text)))
    }
}

fn compile(catalog: &EntailmentCatalog) -> Result<Vec<(EntailmentTag, Vec<Regex>)>, ConfigError> {
    EntailmentTag::ALL
        .iter()
        .map(|tag| {
            let regexes = catalog
                .patterns_for(*tag)
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                        tag: tag.code().to_string(),
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((*tag, regexes))
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
