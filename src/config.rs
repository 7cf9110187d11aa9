//! Engine configuration: thresholds, cadence, and pattern catalogs
//!
//! Every section falls back to the `DEFAULT_*` constants, so a config file
//! only needs the keys it overrides.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{EntailmentTag, TensionPair};
use crate::{
    DEFAULT_CYCLE_THRESHOLD, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_VOLLEYS,
    DEFAULT_MIN_KEYWORD_HITS, DEFAULT_ORBIT_WINDOW, DEFAULT_REDUNDANCY_THRESHOLD,
    DEFAULT_REDUNDANCY_WINDOW, DEFAULT_SEMANTIC_TOPIC_THRESHOLD, DEFAULT_SYNTHESIS_CADENCE,
    DEFAULT_TEST_THRESHOLD,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DyadConfig {
    pub max_volleys: u32,
}

impl Default for DyadConfig {
    fn default() -> Self {
        Self { max_volleys: DEFAULT_MAX_VOLLEYS }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensionConfig {
    pub cycle_threshold: u32,
    pub test_threshold: u32,
    pub orbit_window: usize,
}

impl Default for TensionConfig {
    fn default() -> Self {
        Self {
            cycle_threshold: DEFAULT_CYCLE_THRESHOLD,
            test_threshold: DEFAULT_TEST_THRESHOLD,
            orbit_window: DEFAULT_ORBIT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedundancyConfig {
    pub threshold: f64,
    pub window: usize,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_REDUNDANCY_THRESHOLD,
            window: DEFAULT_REDUNDANCY_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub min_keyword_hits: usize,
    pub semantic_threshold: f64,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            min_keyword_hits: DEFAULT_MIN_KEYWORD_HITS,
            semantic_threshold: DEFAULT_SEMANTIC_TOPIC_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub max_attempts: u32,
    /// Deadline for the whole refinement loop of one turn
    pub timeout_ms: Option<u64>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub cadence: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self { cadence: DEFAULT_SYNTHESIS_CADENCE }
    }
}

/// One recognized concept with its lexicon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub label: String,
    /// Words or phrases matched on word boundaries, case-insensitive
    pub keywords: Vec<String>,
    /// Phrases embedded once for the semantic fallback
    #[serde(default)]
    pub seeds: Vec<String>,
}

impl TopicSpec {
    pub fn new(label: &str, keywords: &[&str], seeds: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Fixed catalog of topics and the oppositions tracked between them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionCatalog {
    pub version: String,
    pub topics: Vec<TopicSpec>,
    /// Pairs in rotation order
    pub pairs: Vec<[String; 2]>,
}

impl TensionCatalog {
    /// Pairs as typed values, in rotation order
    pub fn tension_pairs(&self) -> Vec<TensionPair> {
        self.pairs
            .iter()
            .map(|[a, b]| TensionPair::new(a.clone(), b.clone()))
            .collect()
    }

    pub fn topic(&self, label: &str) -> Option<&TopicSpec> {
        self.topics.iter().find(|t| t.label == label)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let labels: BTreeSet<&str> = self.topics.iter().map(|t| t.label.as_str()).collect();
        if labels.len() != self.topics.len() {
            return Err(ConfigError::Invalid("duplicate topic label in catalog".into()));
        }
        for [a, b] in &self.pairs {
            if a == b {
                return Err(ConfigError::Invalid(format!("tension pair pairs {:?} with itself", a)));
            }
            for side in [a, b] {
                if !labels.contains(side.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "tension pair references unknown topic {:?}",
                        side
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for TensionCatalog {
    fn default() -> Self {
        let topics = vec![
            TopicSpec::new(
                "structure",
                &["structure", "structures", "structural", "institution", "institutions",
                  "system", "systems", "systemic", "constraint", "constraints", "social forces"],
                &["social structures shape what people do",
                  "institutions constrain individual behaviour"],
            ),
            TopicSpec::new(
                "agency",
                &["agency", "choice", "choices", "choose", "chooses", "decide", "decides",
                  "decision", "intention", "intentions", "blame", "free will"],
                &["people make their own choices",
                  "individuals are responsible for what they decide"],
            ),
            TopicSpec::new(
                "necessity",
                &["necessity", "necessary", "necessarily", "inevitable", "inevitably",
                  "must happen", "determined", "determinism"],
                &["this could not have happened otherwise",
                  "events follow from prior causes by necessity"],
            ),
            TopicSpec::new(
                "contingency",
                &["contingency", "contingent", "accident", "accidental", "chance",
                  "luck", "could have been otherwise"],
                &["it happened by chance and might not have",
                  "history turns on accidents"],
            ),
            TopicSpec::new(
                "individual",
                &["individual", "individuals", "self", "personal", "person", "autonomy"],
                &["each person stands on their own",
                  "the autonomy of a single person"],
            ),
            TopicSpec::new(
                "collective",
                &["collective", "community", "society", "group", "groups", "solidarity", "common good"],
                &["what we owe to the community",
                  "the group matters more than any member"],
            ),
            TopicSpec::new(
                "reason",
                &["reason", "rational", "rationality", "logic", "logical", "argument", "evidence"],
                &["we should follow the argument where it leads",
                  "decisions ought to rest on evidence"],
            ),
            TopicSpec::new(
                "passion",
                &["passion", "passions", "emotion", "emotions", "feeling", "feelings", "desire", "instinct"],
                &["feelings move us more than arguments",
                  "desire drives what we actually do"],
            ),
        ];

        let pairs = [
            ("structure", "agency"),
            ("necessity", "contingency"),
            ("individual", "collective"),
            ("reason", "passion"),
        ]
        .iter()
        .map(|(a, b)| [a.to_string(), b.to_string()])
        .collect();

        Self {
            version: "builtin-1".to_string(),
            topics,
            pairs,
        }
    }
}

/// Lexical trigger patterns per entailment tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntailmentCatalog {
    pub version: String,
    /// Tag code ("implication", ...) → regex patterns
    pub patterns: BTreeMap<String, Vec<String>>,
}

impl EntailmentCatalog {
    /// Patterns for one tag
    pub fn patterns_for(&self, tag: EntailmentTag) -> &[String] {
        self.patterns.get(tag.code()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (code, patterns) in &self.patterns {
            if EntailmentTag::from_code(code).is_none() {
                return Err(ConfigError::Invalid(format!("unknown entailment tag {:?}", code)));
            }
            for pattern in patterns {
                regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    tag: code.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl Default for EntailmentCatalog {
    fn default() -> Self {
        // Patterns need verb-adjacent context; bare keywords rubber-stamp non-answers
        let implication = [
            r"(?i)\bif\b[^.?!;]{1,160}?\bthen\b",
            r"(?i)\btherefore\b",
            r"(?i)\b(entails|entail|implies|imply)\s+(that\s+)?\w+",
            r"(?i)\bit follows that\b",
            r"(?i)\b(which|this|that) means (that )?\w+",
            r"(?i)\bconsequently\b",
            r"(?i)\bwould (have to|require|force|mean)\b",
        ];
        let application = [
            r"(?i)\bin practice\b",
            r"(?i)\bfor (example|instance)\b",
            r"(?i)\bconcretely\b",
            r"(?i)\b(applied|apply|applies) (it |this |that )?to\b",
            r"(?i)\bin the case of\b",
            r"(?i)\bconsider (a|an|the) \w+ (who|that|which|where)\b",
        ];
        let counterexample = [
            r"(?i)\bcounter-?examples?\b",
            r"(?i)\b(fails|breaks down|collapses) (when|if|for|in)\b",
            r"(?i)\bexcept (when|where|if)\b",
            r"(?i)\bbut (consider|take|look at)\b",
            r"(?i)\bthe exception (is|would be)\b",
            r"(?i)\bdoes(n't| not) hold (when|if|for)\b",
        ];
        let test = [
            r"(?i)\b(criterion|criteria)\s+(for|of|is|are|would|that)\b",
            r"(?i)\bobservable\s+\w+",
            r"(?i)\bfalsifi(able|ed|es|y)\b",
            r"(?i)\b(could|can|would|might|should|to|we)\s+(test|measure|observe|check|verify)\b",
            r"(?i)\btest (whether|if|for|this|that)\b",
            r"(?i)\bwould (show|count as|disprove|refute)\b",
        ];

        let mut patterns = BTreeMap::new();
        for (tag, list) in [
            (EntailmentTag::Implication, &implication[..]),
            (EntailmentTag::Application, &application[..]),
            (EntailmentTag::Counterexample, &counterexample[..]),
            (EntailmentTag::Test, &test[..]),
        ] {
            patterns.insert(
                tag.code().to_string(),
                list.iter().map(|p| p.to_string()).collect(),
            );
        }

        Self {
            version: "builtin-1".to_string(),
            patterns,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dyad: DyadConfig,
    pub tension: TensionConfig,
    pub redundancy: RedundancyConfig,
    pub topics: TopicConfig,
    pub refinement: RefinementConfig,
    pub synthesis: SynthesisConfig,
    pub catalog: TensionCatalog,
    pub entailment: EntailmentCatalog,
}

impl EngineConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Parse and validate JSON
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and catalog consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(name: &str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be in (0, 1], got {}", name, value)))
            }
        }
        fn positive(name: &str, value: u64) -> Result<(), ConfigError> {
            if value > 0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be positive", name)))
            }
        }

        unit("redundancy.threshold", self.redundancy.threshold)?;
        unit("topics.semantic_threshold", self.topics.semantic_threshold)?;
        positive("redundancy.window", self.redundancy.window as u64)?;
        positive("dyad.max_volleys", self.dyad.max_volleys as u64)?;
        positive("tension.cycle_threshold", self.tension.cycle_threshold as u64)?;
        positive("tension.test_threshold", self.tension.test_threshold as u64)?;
        positive("tension.orbit_window", self.tension.orbit_window as u64)?;
        positive("refinement.max_attempts", self.refinement.max_attempts as u64)?;
        positive("synthesis.cadence", self.synthesis.cadence)?;
        self.catalog.validate()?;
        self.entailment.validate()?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
