//! Turn model for progression control
//!
//! - Turn = one committed utterance, immutable after commit
//! - History = ordered, append-only list of turns with trailing-window views

use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntailmentTag;

/// Speaker identifier (persona name, "A", "B", ...)
pub type SpeakerId = String;

/// Recognized concept label from the tension catalog
pub type TopicLabel = String;

/// How a committed turn moves the discussion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    /// A regular persona turn that went through the quality gate
    Ordinary,
    /// An injected consequence question
    ConsequenceTest,
    /// Announcement of a forced tension switch
    PivotAnnouncement,
    /// Mandatory periodic summary
    Synthesis,
}

impl MoveKind {
    /// Ordinary turns are the only substantive claims
    pub fn is_substantive(&self) -> bool {
        matches!(self, MoveKind::Ordinary)
    }

    /// Parse the snake_case code used in snapshots
    pub fn from_code(code: &str) -> Option<Self> {
        [
            MoveKind::Ordinary,
            MoveKind::ConsequenceTest,
            MoveKind::PivotAnnouncement,
            MoveKind::Synthesis,
        ]
        .into_iter()
        .find(|k| k.code() == code)
    }

    pub fn code(&self) -> &'static str {
        match self {
            MoveKind::Ordinary => "ordinary",
            MoveKind::ConsequenceTest => "consequence_test",
            MoveKind::PivotAnnouncement => "pivot_announcement",
            MoveKind::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for MoveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A single committed turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Sequential index, starting at 1
    pub index: u64,
    /// Who spoke
    pub speaker: SpeakerId,
    /// The text content
    pub text: String,
    /// Topic labels detected in the text
    pub topics: BTreeSet<TopicLabel>,
    /// Entailment tags detected in the text
    pub entailments: BTreeSet<EntailmentTag>,
    /// Move classification
    pub kind: MoveKind,
    /// Accepted without passing every quality check
    pub best_effort: bool,
    /// Highest similarity against the trailing window at acceptance
    pub redundancy_score: f64,
    /// When the turn was committed
    pub committed_at: DateTime<Utc>,
}

impl Turn {
    /// Create an ordinary turn stamped now
    pub fn new(index: u64, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            speaker: speaker.into(),
            text: text.into(),
            topics: BTreeSet::new(),
            entailments: BTreeSet::new(),
            kind: MoveKind::Ordinary,
            best_effort: false,
            redundancy_score: 0.0,
            committed_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: MoveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn has_entailment(&self) -> bool {
        !self.entailments.is_empty()
    }

    /// Short excerpt for intervention payloads
    pub fn excerpt(&self, max_chars: usize) -> String {
        let text = self.text.trim();
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Append-only conversation history
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from already-committed turns (snapshot restore)
    pub fn from_turns(mut turns: Vec<Turn>) -> Self {
        turns.sort_by_key(|t| t.index);
        turns.dedup_by_key(|t| t.index);
        Self { turns }
    }

    /// Index the next committed turn will receive
    pub fn next_index(&self) -> u64 {
        self.turns.last().map(|t| t.index + 1).unwrap_or(1)
    }

    /// Append a turn. Its index must be the next one.
    pub fn push(&mut self, mut turn: Turn) -> &Turn {
        let expected = self.next_index();
        debug_assert_eq!(turn.index, expected, "turn index collision");
        if turn.index != expected {
            turn.index = expected;
        }
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// All turns (oldest first)
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn as_slice(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn get(&self, index: u64) -> Option<&Turn> {
        self.turns
            .binary_search_by_key(&index, |t| t.index)
            .ok()
            .map(|pos| &self.turns[pos])
    }

    /// Last `n` ordinary turns (oldest first)
    pub fn recent_ordinary(&self, n: usize) -> Vec<&Turn> {
        let mut recent: Vec<&Turn> = self.turns
            .iter()
            .rev()
            .filter(|t| t.kind.is_substantive())
            .take(n)
            .collect();
        recent.reverse();
        recent
    }

    /// Number of ordinary turns; the newest one's ordinal
    pub fn ordinary_count(&self) -> u64 {
        self.turns.iter().filter(|t| t.kind.is_substantive()).count() as u64
    }

    /// Most recent non-intervention turn
    pub fn last_substantive(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.kind.is_substantive())
    }

    /// Speaker of the most recent ordinary turn
    pub fn last_speaker(&self) -> Option<&str> {
        self.last_substantive().map(|t| t.speaker.as_str())
    }

    /// Unique speakers in order of first appearance
    pub fn speakers(&self) -> Vec<SpeakerId> {
        let mut seen: Vec<SpeakerId> = Vec::new();
        for turn in self.turns.iter().filter(|t| t.kind.is_substantive()) {
            if !seen.contains(&turn.speaker) {
                seen.push(turn.speaker.clone());
            }
        }
        seen
    }
}

// =============================================================================
// TESTS
// =============================================================================
