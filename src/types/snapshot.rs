//! Snapshot types for persistence and audit
//!
//! Every field is a primitive (string, integer, float, bool) or a list/record
//! of primitives, so a snapshot is storable in any structured format.

use std::collections::BTreeMap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntailmentTag, MoveKind, Turn};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Complete serializable conversation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    /// RFC 3339 timestamp
    pub taken_at: String,
    /// Version of the tension catalog in use
    pub catalog_version: String,
    pub history: Vec<TurnRecord>,
    pub dyads: Vec<DyadRecord>,
    pub tensions: Vec<TensionRecord>,
    pub active_pair: Option<[String; 2]>,
    pub last_synthesis_index: u64,
    pub last_pivot_index: Option<u64>,
    pub next_index: u64,
    /// Hex SHA-256 over the history records
    pub digest: String,
}

/// One committed turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub index: u64,
    pub speaker: String,
    pub text: String,
    pub topics: Vec<String>,
    pub entailments: Vec<String>,
    pub kind: String,
    pub best_effort: bool,
    pub redundancy_score: f64,
    /// RFC 3339 timestamp
    pub committed_at: String,
}

/// Volley counter for one speaker pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DyadRecord {
    pub speakers: [String; 2],
    pub volleys: u32,
    pub max_volleys: u32,
}

/// Counters for one tension pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionRecord {
    pub topics: [String; 2],
    pub cycles: u32,
    pub tests: u32,
    /// Ordinary-turn ordinals, not history indices
    pub last_entailment_turn: Option<u64>,
    pub last_test_turn: Option<u64>,
    pub discussed: bool,
}

impl From<&Turn> for TurnRecord {
    fn from(turn: &Turn) -> Self {
        Self {
            index: turn.index,
            speaker: turn.speaker.clone(),
            text: turn.text.clone(),
            topics: turn.topics.iter().cloned().collect(),
            entailments: turn.entailments.iter().map(|t| t.code().to_string()).collect(),
            kind: turn.kind.code().to_string(),
            best_effort: turn.best_effort,
            redundancy_score: turn.redundancy_score,
            committed_at: turn.committed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl TurnRecord {
    /// Rebuild the turn. Unknown tags are dropped, an unknown kind reads as ordinary.
    pub fn to_turn(&self) -> Turn {
        Turn {
            index: self.index,
            speaker: self.speaker.clone(),
            text: self.text.clone(),
            topics: self.topics.iter().cloned().collect(),
            entailments: self
                .entailments
                .iter()
                .filter_map(|code| EntailmentTag::from_code(code))
                .collect(),
            kind: MoveKind::from_code(&self.kind).unwrap_or(MoveKind::Ordinary),
            best_effort: self.best_effort,
            redundancy_score: self.redundancy_score,
            committed_at: DateTime::parse_from_rfc3339(&self.committed_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

impl SessionSnapshot {
    /// Flatten to dotted keys (`turn.3.text`, `dyad.A|B.volleys`, ...)
    pub fn to_flat_records(&self) -> BTreeMap<String, Value> {
        let mut flat = BTreeMap::new();

        flat.insert("version".to_string(), Value::from(self.version));
        flat.insert("taken_at".to_string(), Value::from(self.taken_at.clone()));
        flat.insert("catalog_version".to_string(), Value::from(self.catalog_version.clone()));
        flat.insert("last_synthesis_index".to_string(), Value::from(self.last_synthesis_index));
        flat.insert("last_pivot_index".to_string(), opt(self.last_pivot_index));
        flat.insert("next_index".to_string(), Value::from(self.next_index));
        flat.insert("digest".to_string(), Value::from(self.digest.clone()));
        flat.insert(
            "active_pair".to_string(),
            self.active_pair
                .as_ref()
                .map(|[a, b]| Value::from(format!("{}|{}", a, b)))
                .unwrap_or(Value::Null),
        );

        for turn in &self.history {
            let prefix = format!("turn.{}", turn.index);
            flat.insert(format!("{}.speaker", prefix), Value::from(turn.speaker.clone()));
            flat.insert(format!("{}.text", prefix), Value::from(turn.text.clone()));
            flat.insert(format!("{}.topics", prefix), Value::from(turn.topics.clone()));
            flat.insert(format!("{}.entailments", prefix), Value::from(turn.entailments.clone()));
            flat.insert(format!("{}.kind", prefix), Value::from(turn.kind.clone()));
            flat.insert(format!("{}.best_effort", prefix), Value::from(turn.best_effort));
            flat.insert(format!("{}.redundancy_score", prefix), Value::from(turn.redundancy_score));
            flat.insert(format!("{}.committed_at", prefix), Value::from(turn.committed_at.clone()));
        }

        for dyad in &self.dyads {
            let prefix = format!("dyad.{}|{}", dyad.speakers[0], dyad.speakers[1]);
            flat.insert(format!("{}.volleys", prefix), Value::from(dyad.volleys));
            flat.insert(format!("{}.max_volleys", prefix), Value::from(dyad.max_volleys));
        }

        for tension in &self.tensions {
            let prefix = format!("tension.{}|{}", tension.topics[0], tension.topics[1]);
            flat.insert(format!("{}.cycles", prefix), Value::from(tension.cycles));
            flat.insert(format!("{}.tests", prefix), Value::from(tension.tests));
            flat.insert(format!("{}.last_entailment_turn", prefix), opt(tension.last_entailment_turn));
            flat.insert(format!("{}.last_test_turn", prefix), opt(tension.last_test_turn));
            flat.insert(format!("{}.discussed", prefix), Value::from(tension.discussed));
        }

        flat
    }
}

fn opt(value: Option<u64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_record_keeps_fields() {
        let mut turn = Turn::new(3, "A", "if it holds, then blame needs a threshold")
            .with_kind(MoveKind::Ordinary);
        turn.topics.insert("agency".to_string());
        turn.entailments.insert(EntailmentTag::Implication);
        turn.best_effort = true;

        let record = TurnRecord::from(&turn);
        assert_eq!(record.kind, "ordinary");
        assert_eq!(record.entailments, vec!["implication".to_string()]);

        let back = record.to_turn();
        assert_eq!(back.index, 3);
        assert_eq!(back.topics, turn.topics);
        assert_eq!(back.entailments, turn.entailments);
        assert!(back.best_effort);
        assert_eq!(back.committed_at.timestamp_millis(), turn.committed_at.timestamp_millis());
    }

    #[test]
    fn test_flat_records_keys() {
        let snapshot = SessionSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: "2026-01-01T00:00:00Z".to_string(),
            catalog_version: "builtin-1".to_string(),
            history: vec![TurnRecord::from(&Turn::new(1, "A", "hello"))],
            dyads: vec![DyadRecord {
                speakers: ["A".to_string(), "B".to_string()],
                volleys: 1,
                max_volleys: 2,
            }],
            tensions: vec![TensionRecord {
                topics: ["agency".to_string(), "structure".to_string()],
                cycles: 2,
                tests: 0,
                last_entailment_turn: None,
                last_test_turn: None,
                discussed: true,
            }],
            active_pair: Some(["agency".to_string(), "structure".to_string()]),
            last_synthesis_index: 0,
            last_pivot_index: None,
            next_index: 2,
            digest: String::new(),
        };
        let flat = snapshot.to_flat_records();
        assert_eq!(flat.get("turn.1.text"), Some(&Value::from("hello")));
        assert_eq!(flat.get("dyad.A|B.volleys"), Some(&Value::from(1u32)));
        assert_eq!(flat.get("tension.agency|structure.cycles"), Some(&Value::from(2u32)));
        assert_eq!(flat.get("active_pair"), Some(&Value::from("agency|structure")));
        assert_eq!(flat.get("last_pivot_index"), Some(&Value::Null));
    }
}
