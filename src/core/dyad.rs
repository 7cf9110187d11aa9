//! Dyad Tracker: per-speaker-pair volley budget
//!
//! A volley is counted when a committed turn's speaker differs from the
//! previous speaker. Rotation to a third speaker resets the pair that was
//! volleying; a pivot resets every pair. Counters saturate at the maximum.

use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{DyadKey, DyadRecord, SpeakerId};

/// Volley counter for one speaker pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyadState {
    pub volleys: u32,
    pub max_volleys: u32,
}

impl DyadState {
    pub fn budget_exceeded(&self) -> bool {
        self.volleys >= self.max_volleys
    }
}

/// Volley counters for every pair seen this session
#[derive(Debug, Clone)]
pub struct DyadTracker {
    max_volleys: u32,
    dyads: BTreeMap<DyadKey, DyadState>,
    last_speaker: Option<SpeakerId>,
    current: Option<DyadKey>,
}

impl DyadTracker {
    pub fn new(max_volleys: u32) -> Self {
        Self {
            max_volleys,
            dyads: BTreeMap::new(),
            last_speaker: None,
            current: None,
        }
    }

    /// Register a committed turn by `speaker`
    pub fn record_turn(&mut self, speaker: &str) {
        let previous = self.last_speaker.replace(speaker.to_string());
        let Some(previous) = previous else {
            return;
        };
        if previous == speaker {
            return;
        }

        let key = DyadKey::new(previous, speaker);
        if let Some(current) = self.current.take() {
            if current != key {
                debug!(dyad = %current, "third speaker rotated in, resetting dyad");
                self.reset(&current);
            }
        }

        let max = self.max_volleys;
        let state = self.dyads.entry(key.clone()).or_insert(DyadState {
            volleys: 0,
            max_volleys: max,
        });
        state.volleys = state.volleys.saturating_add(1).min(state.max_volleys);
        self.current = Some(key);
    }

    /// Volleys exhausted for `pair`
    pub fn budget_exceeded(&self, pair: &DyadKey) -> bool {
        self.dyads.get(pair).map(DyadState::budget_exceeded).unwrap_or(false)
    }

    pub fn volleys(&self, pair: &DyadKey) -> u32 {
        self.dyads.get(pair).map(|s| s.volleys).unwrap_or(0)
    }

    /// Zero one pair
    pub fn reset(&mut self, pair: &DyadKey) {
        if let Some(state) = self.dyads.get_mut(pair) {
            state.volleys = 0;
        }
    }

    /// Zero every pair (pivot)
    pub fn reset_all(&mut self) {
        for state in self.dyads.values_mut() {
            state.volleys = 0;
        }
    }

    /// Pair currently volleying, if any
    pub fn current(&self) -> Option<&DyadKey> {
        self.current.as_ref()
    }

    pub fn last_speaker(&self) -> Option<&str> {
        self.last_speaker.as_deref()
    }

    pub fn get(&self, pair: &DyadKey) -> Option<&DyadState> {
        self.dyads.get(pair)
    }

    pub fn records(&self) -> Vec<DyadRecord> {
        self.dyads
            .iter()
            .map(|(key, state)| DyadRecord {
                speakers: key.to_array(),
                volleys: state.volleys,
                max_volleys: state.max_volleys,
            })
            .collect()
    }

    /// Rebuild from snapshot records plus the recent speaker sequence
    pub fn restore(max_volleys: u32, records: &[DyadRecord], last_speakers: &[&str]) -> Self {
        let mut tracker = Self::new(max_volleys);
        for record in records {
            let [a, b] = &record.speakers;
            tracker.dyads.insert(
                DyadKey::new(a.clone(), b.clone()),
                DyadState {
                    volleys: record.volleys.min(record.max_volleys),
                    max_volleys: record.max_volleys,
                },
            );
        }
        // Last two distinct consecutive speakers give the current dyad
        if let Some(last) = last_speakers.last() {
            tracker.last_speaker = Some(last.to_string());
            if let Some(prev) = last_speakers.iter().rev().skip(1).find(|s| *s != last) {
                let key = DyadKey::new(prev.to_string(), last.to_string());
                if tracker.dyads.contains_key(&key) {
                    tracker.current = Some(key);
                }
            }
        }
        tracker
    }
}

// =============================================================================
// TESTS
// =============================================================================
