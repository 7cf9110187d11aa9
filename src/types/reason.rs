//! Reason codes for refinement decisions and interventions

use serde::{Deserialize, Serialize};

/// Reason codes for every accept/revise decision and intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ReasonCode {
    // =========================================================================
    // R1xx: Refinement loop
    // =========================================================================
    /// Draft passed redundancy and entailment checks
    R101_DRAFT_ACCEPTED,
    /// Draft too similar to a recent turn
    R102_DRAFT_REDUNDANT,
    /// Draft adds no implication, application, counterexample or test
    R103_DRAFT_NO_ENTAILMENT,
    /// Attempt ceiling reached, best draft accepted
    R104_BEST_EFFORT_MAX_ATTEMPTS,
    /// Session deadline elapsed, best draft accepted
    R105_BEST_EFFORT_TIMEOUT,

    // =========================================================================
    // R2xx: Interventions
    // =========================================================================
    /// Tension cycled past its threshold without new entailment
    R201_TENSION_SATURATED,
    /// Consequence tests spent without an entailment landing
    R202_TESTS_EXHAUSTED,
    /// Synthesis cadence reached
    R203_SYNTHESIS_CADENCE,

    // =========================================================================
    // R3xx: Cadence / rotation advice
    // =========================================================================
    /// Speaker pair used its volley budget
    R301_DYAD_BUDGET_EXCEEDED,
}

impl ReasonCode {
    /// Get the code string (for logging)
    pub fn code(&self) -> &'static str {
        match self {
            Self::R101_DRAFT_ACCEPTED => "R101_DRAFT_ACCEPTED",
            Self::R102_DRAFT_REDUNDANT => "R102_DRAFT_REDUNDANT",
            Self::R103_DRAFT_NO_ENTAILMENT => "R103_DRAFT_NO_ENTAILMENT",
            Self::R104_BEST_EFFORT_MAX_ATTEMPTS => "R104_BEST_EFFORT_MAX_ATTEMPTS",
            Self::R105_BEST_EFFORT_TIMEOUT => "R105_BEST_EFFORT_TIMEOUT",
            Self::R201_TENSION_SATURATED => "R201_TENSION_SATURATED",
            Self::R202_TESTS_EXHAUSTED => "R202_TESTS_EXHAUSTED",
            Self::R203_SYNTHESIS_CADENCE => "R203_SYNTHESIS_CADENCE",
            Self::R301_DYAD_BUDGET_EXCEEDED => "R301_DYAD_BUDGET_EXCEEDED",
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::R101_DRAFT_ACCEPTED => "Draft adds new content",
            Self::R102_DRAFT_REDUNDANT => "Draft repeats a recent turn",
            Self::R103_DRAFT_NO_ENTAILMENT => "Draft has no entailment",
            Self::R104_BEST_EFFORT_MAX_ATTEMPTS => "Accepted best draft after max attempts",
            Self::R105_BEST_EFFORT_TIMEOUT => "Accepted best draft after session timeout",
            Self::R201_TENSION_SATURATED => "Tension is orbiting without new implications",
            Self::R202_TESTS_EXHAUSTED => "Consequence tests failed to move the tension",
            Self::R203_SYNTHESIS_CADENCE => "Periodic synthesis is due",
            Self::R301_DYAD_BUDGET_EXCEEDED => "Speaker pair exhausted its volley budget",
        }
    }

    /// Does this code mark a best-effort acceptance?
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            Self::R104_BEST_EFFORT_MAX_ATTEMPTS | Self::R105_BEST_EFFORT_TIMEOUT
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}
