//! Volley: discussion progression control for multi-agent dialogue
//!
//! Candidate turn → ProgressionController → [TopicExtractor, EntailmentDetector,
//! RedundancyChecker] → accept/revise → commit → Dyad/Tension trackers → interventions

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod types;

// =============================================================================
// REFINEMENT LOOP
// =============================================================================

/// Revision requests allowed per turn (generator calls <= this + 1)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Revision instruction sent when a draft repeats recent turns
pub const REVISION_AVOID_REPETITION: &str =
    "avoid repetition; add a new implication, application, counterexample, or test";

/// Revision instruction sent when a draft has no entailment
pub const REVISION_ADD_ENTAILMENT: &str =
    "add at least one entailment: implication, application, counterexample, or test";

// =============================================================================
// DETECTOR THRESHOLDS
// =============================================================================

/// Cosine similarity at or above which a draft is redundant
pub const DEFAULT_REDUNDANCY_THRESHOLD: f64 = 0.85;

/// Trailing window of ordinary turns checked for redundancy
pub const DEFAULT_REDUNDANCY_WINDOW: usize = 4;

/// Keyword hits below which the semantic topic fallback runs
pub const DEFAULT_MIN_KEYWORD_HITS: usize = 1;

/// Seed-phrase similarity needed for a semantic topic match
pub const DEFAULT_SEMANTIC_TOPIC_THRESHOLD: f64 = 0.68;

// =============================================================================
// CADENCE
// =============================================================================

/// Volleys a speaker pair may exchange before rotation is advised
pub const DEFAULT_MAX_VOLLEYS: u32 = 2;

/// Orbit cycles before a consequence test
pub const DEFAULT_CYCLE_THRESHOLD: u32 = 2;

/// Consequence tests before a forced pivot
pub const DEFAULT_TEST_THRESHOLD: u32 = 2;

/// Trailing turns in which the opposite side counts as "just mentioned"
pub const DEFAULT_ORBIT_WINDOW: usize = 2;

/// Minimum turns between an entailment and a consequence test on the same pair
pub const ENTAILMENT_COOLDOWN_TURNS: u64 = 2;

/// Committed turns between mandatory syntheses
pub const DEFAULT_SYNTHESIS_CADENCE: u64 = 12;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
