//! State machine definitions: candidate turns and tension pairs

use serde::{Deserialize, Serialize};

/// Lifecycle of one candidate turn inside the refinement loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateState {
    /// Draft received from the generator, not yet judged
    Proposed,
    /// Too similar to the trailing window, revision requested
    RedundantRetry,
    /// No entailment detected, revision requested
    NoEntailmentRetry,
    /// Passed the gate (or accepted as best effort)
    Accepted,
    /// Appended to history
    Committed,
}

impl std::fmt::Display for CandidateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CandidateState::Proposed => "PROPOSED",
            CandidateState::RedundantRetry => "REDUNDANT_RETRY",
            CandidateState::NoEntailmentRetry => "NO_ENTAILMENT_RETRY",
            CandidateState::Accepted => "ACCEPTED",
            CandidateState::Committed => "COMMITTED",
        };
        write!(f, "{}", name)
    }
}

/// Phase of a tension pair
///
/// Active(cycles < threshold) → Saturated → Tested → [Active on entailment]
/// → PivotRequired → reset on pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TensionPhase {
    /// Cycling below the threshold
    Active,
    /// Cycle threshold reached, no test injected yet
    Saturated,
    /// At least one consequence test injected, budget not spent
    Tested,
    /// Test budget spent with no entailment since the last test
    PivotRequired,
}

impl TensionPhase {
    /// Terminal color for this phase
    pub fn color(&self) -> colored::Color {
        match self {
            TensionPhase::Active => colored::Color::Green,
            TensionPhase::Saturated => colored::Color::Yellow,
            TensionPhase::Tested => colored::Color::Cyan,
            TensionPhase::PivotRequired => colored::Color::Red,
        }
    }
}

impl std::fmt::Display for TensionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TensionPhase::Active => "ACTIVE",
            TensionPhase::Saturated => "SATURATED",
            TensionPhase::Tested => "TESTED",
            TensionPhase::PivotRequired => "PIVOT_REQUIRED",
        };
        write!(f, "{}", name)
    }
}
