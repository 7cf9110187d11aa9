//! Conversation state: the single aggregate the controller mutates
//!
//! History, dyad and tension trackers, the active tension, and the cadence
//! markers. Everything here round-trips through `SessionSnapshot`.

use std::collections::BTreeSet;
use chrono::{SecondsFormat, Utc};

use crate::config::EngineConfig;
use crate::core::dyad::DyadTracker;
use crate::core::snapshot::history_digest;
use crate::core::tension::TensionTracker;
use crate::types::{History, SessionSnapshot, TensionPair, TopicLabel, TurnRecord, SNAPSHOT_VERSION};

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub(crate) history: History,
    pub(crate) dyads: DyadTracker,
    pub(crate) tensions: TensionTracker,
    pub(crate) active: Option<TensionPair>,
    /// Index of the turn that last triggered (or was) a synthesis; 0 = none yet
    pub(crate) last_synthesis_index: u64,
    pub(crate) last_pivot_index: Option<u64>,
}

impl ConversationState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            history: History::new(),
            dyads: DyadTracker::new(config.dyad.max_volleys),
            tensions: TensionTracker::new(config.catalog.tension_pairs(), config.tension.clone()),
            active: None,
            last_synthesis_index: 0,
            last_pivot_index: None,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn dyads(&self) -> &DyadTracker {
        &self.dyads
    }

    pub fn tensions(&self) -> &TensionTracker {
        &self.tensions
    }

    pub fn active_tension(&self) -> Option<&TensionPair> {
        self.active.as_ref()
    }

    pub fn last_synthesis_index(&self) -> u64 {
        self.last_synthesis_index
    }

    pub fn last_pivot_index(&self) -> Option<u64> {
        self.last_pivot_index
    }

    /// Serializable copy of the full state
    pub fn snapshot(&self, catalog_version: &str) -> SessionSnapshot {
        let history: Vec<TurnRecord> = self.history.turns().map(TurnRecord::from).collect();
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            catalog_version: catalog_version.to_string(),
            digest: history_digest(&history),
            history,
            dyads: self.dyads.records(),
            tensions: self.tensions.records(),
            active_pair: self.active.as_ref().map(TensionPair::to_array),
            last_synthesis_index: self.last_synthesis_index,
            last_pivot_index: self.last_pivot_index,
            next_index: self.history.next_index(),
        }
    }

    /// Rebuild from a snapshot. Thresholds come from `config`, counters from the snapshot.
    pub fn restore(snapshot: &SessionSnapshot, config: &EngineConfig) -> Self {
        let history = History::from_turns(snapshot.history.iter().map(TurnRecord::to_turn).collect());

        let speakers: Vec<&str> = history
            .turns()
            .filter(|t| t.kind.is_substantive())
            .map(|t| t.speaker.as_str())
            .collect();
        let dyads = DyadTracker::restore(config.dyad.max_volleys, &snapshot.dyads, &speakers);

        let recent_topics: Vec<BTreeSet<TopicLabel>> = history
            .recent_ordinary(config.tension.orbit_window)
            .into_iter()
            .map(|t| t.topics.clone())
            .collect();
        let tensions = TensionTracker::restore(
            config.catalog.tension_pairs(),
            config.tension.clone(),
            &snapshot.tensions,
            recent_topics,
        );

        Self {
            active: snapshot
                .active_pair
                .as_ref()
                .map(|[a, b]| TensionPair::new(a.clone(), b.clone())),
            last_synthesis_index: snapshot.last_synthesis_index,
            last_pivot_index: snapshot.last_pivot_index,
            history,
            dyads,
            tensions,
        }
    }
}
