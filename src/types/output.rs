//! Controller outputs: interventions and per-turn outcomes

use std::collections::BTreeSet;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::types::{CandidateState, EntailmentTag, MoveKind, ReasonCode, TensionPair, Turn};

/// Kind of structured intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterventionKind {
    ConsequenceTest,
    Pivot,
    Synthesis,
}

impl InterventionKind {
    /// Move classification of the turn that renders this intervention
    pub fn move_kind(&self) -> MoveKind {
        match self {
            InterventionKind::ConsequenceTest => MoveKind::ConsequenceTest,
            InterventionKind::Pivot => MoveKind::PivotAnnouncement,
            InterventionKind::Synthesis => MoveKind::Synthesis,
        }
    }
}

impl std::fmt::Display for InterventionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InterventionKind::ConsequenceTest => "CONSEQUENCE_TEST",
            InterventionKind::Pivot => "PIVOT",
            InterventionKind::Synthesis => "SYNTHESIS",
        };
        write!(f, "{}", name)
    }
}

/// An intervention to be rendered and inserted into the transcript by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub kind: InterventionKind,
    /// Text to insert (question, announcement, or synthesis instruction)
    pub payload: String,
    /// Human-readable reason
    pub reason: String,
    /// Machine-readable reason
    pub code: ReasonCode,
    /// Tension pair concerned, if any
    pub related_pair: Option<(String, String)>,
    /// Turn that triggered the intervention
    pub after_turn: u64,
}

impl Intervention {
    pub fn new(
        kind: InterventionKind,
        payload: impl Into<String>,
        code: ReasonCode,
        related_pair: Option<&TensionPair>,
        after_turn: u64,
    ) -> Self {
        Self {
            kind,
            payload: payload.into(),
            reason: code.description().to_string(),
            code,
            related_pair: related_pair.map(TensionPair::as_tuple),
            after_turn,
        }
    }

    /// Tension pair as a typed value
    pub fn pair(&self) -> Option<TensionPair> {
        self.related_pair
            .as_ref()
            .map(|(a, b)| TensionPair::new(a.clone(), b.clone()))
    }

    /// Format for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        let label = format!("[{}]", self.kind);
        let label = match self.kind {
            InterventionKind::ConsequenceTest => label.yellow().bold(),
            InterventionKind::Pivot => label.red().bold(),
            InterventionKind::Synthesis => label.cyan().bold(),
        };
        format!("{} {} {}", label, self.payload, format!("({})", self.code.code()).dimmed())
    }

    /// Format for parseable output (no colors)
    pub fn to_parseable_string(&self) -> String {
        format!("kind={} | reason={} | {}", self.kind, self.code.code(), self.payload)
    }
}

/// One pass through the quality gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0 for the initial draft, n for the n-th revision
    pub attempt: u32,
    /// Revision instruction that produced this draft
    pub instruction: Option<String>,
    pub text: String,
    pub redundancy_score: f64,
    pub redundant: bool,
    pub entailments: BTreeSet<EntailmentTag>,
    /// Where the candidate went after this check
    pub state: CandidateState,
}

impl AttemptRecord {
    /// Number of quality checks this draft passes (0..=2)
    pub fn checks_passed(&self) -> u8 {
        u8::from(!self.redundant) + u8::from(!self.entailments.is_empty())
    }
}

/// Audit trail of the refinement loop for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementReport {
    pub attempts: Vec<AttemptRecord>,
    pub generator_calls: u32,
    pub outcome: ReasonCode,
    pub best_effort: bool,
}

/// Result of `propose_and_commit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn: Turn,
    pub interventions: Vec<Intervention>,
    pub refinement: RefinementReport,
}

impl TurnOutcome {
    /// Format the committed turn for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        let tags: Vec<&str> = self.turn.entailments.iter().map(|t| t.code()).collect();
        let topics: Vec<&str> = self.turn.topics.iter().map(String::as_str).collect();
        let flag = if self.turn.best_effort {
            " best-effort".magenta().to_string()
        } else {
            String::new()
        };
        format!(
            "{} {}: {}\n  {}{}",
            format!("#{}", self.turn.index).dimmed(),
            self.turn.speaker.bold(),
            self.turn.text,
            format!(
                "topics=[{}] entail=[{}] sim={:.2} calls={} {}",
                topics.join(","),
                tags.join(","),
                self.turn.redundancy_score,
                self.refinement.generator_calls,
                self.refinement.outcome.code(),
            )
            .dimmed(),
            flag
        )
    }

    /// Format for parseable output (no colors)
    pub fn to_parseable_string(&self) -> String {
        let tags: Vec<&str> = self.turn.entailments.iter().map(|t| t.code()).collect();
        let topics: Vec<&str> = self.turn.topics.iter().map(String::as_str).collect();
        format!(
            "turn={} | speaker={} | topics={} | entail={} | sim={:.3} | calls={} | reason={}{}",
            self.turn.index,
            self.turn.speaker,
            topics.join(","),
            tags.join(","),
            self.turn.redundancy_score,
            self.refinement.generator_calls,
            self.refinement.outcome.code(),
            if self.turn.best_effort { " | best_effort" } else { "" }
        )
    }
}
