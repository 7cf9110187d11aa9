//! Tension Tracker: orbiting detection and intervention budgets per topic pair
//!
//! A cycle is counted when a turn mentions one side of a pair while the other
//! side was mentioned in the same turn or within the trailing orbit window.
//! Entailment on the active pair resets its cycles; tests are never refunded.
//!
//! Distances (test spacing, entailment cooldown) are measured in ordinary
//! turns. Callers pass the ordinal of the ordinary turn being processed, so
//! committed interventions never widen the gap between two persona turns.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::config::TensionConfig;
use crate::types::{TensionPair, TensionPhase, TensionRecord, TopicLabel};
use crate::ENTAILMENT_COOLDOWN_TURNS;

/// Counters for one tension pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TensionState {
    pub cycles: u32,
    pub tests: u32,
    /// Ordinary-turn ordinal of the last entailment while this pair was active
    pub last_entailment_turn: Option<u64>,
    /// Ordinary-turn ordinal after which the last consequence test was injected
    pub last_test_turn: Option<u64>,
    /// Has been active or has orbited at least once
    pub discussed: bool,
}

/// Tension counters for the whole catalog
#[derive(Debug, Clone)]
pub struct TensionTracker {
    config: TensionConfig,
    catalog: Vec<TensionPair>,
    states: BTreeMap<TensionPair, TensionState>,
    /// Topics of the last `orbit_window` turns (oldest first)
    recent_topics: VecDeque<BTreeSet<TopicLabel>>,
}

impl TensionTracker {
    pub fn new(catalog: Vec<TensionPair>, config: TensionConfig) -> Self {
        Self {
            config,
            catalog,
            states: BTreeMap::new(),
            recent_topics: VecDeque::new(),
        }
    }

    /// Catalog pairs in rotation order
    pub fn catalog(&self) -> &[TensionPair] {
        &self.catalog
    }

    pub fn config(&self) -> &TensionConfig {
        &self.config
    }

    pub fn state(&self, pair: &TensionPair) -> Option<&TensionState> {
        self.states.get(pair)
    }

    pub fn cycles(&self, pair: &TensionPair) -> u32 {
        self.states.get(pair).map(|s| s.cycles).unwrap_or(0)
    }

    pub fn tests(&self, pair: &TensionPair) -> u32 {
        self.states.get(pair).map(|s| s.tests).unwrap_or(0)
    }

    fn state_mut(&mut self, pair: &TensionPair) -> &mut TensionState {
        self.states.entry(pair.clone()).or_default()
    }

    /// Count orbit cycles for a committed turn's topics
    pub fn update(&mut self, topics: &BTreeSet<TopicLabel>, active: Option<&TensionPair>) {
        if let Some(active) = active {
            self.state_mut(active).discussed = true;
        }

        let catalog = self.catalog.clone();
        for pair in &catalog {
            if self.orbits(pair, topics) {
                let state = self.state_mut(pair);
                state.cycles = state.cycles.saturating_add(1);
                state.discussed = true;
                debug!(pair = %pair, cycles = state.cycles, "tension orbit");
            }
        }

        self.recent_topics.push_back(topics.clone());
        while self.recent_topics.len() > self.config.orbit_window {
            self.recent_topics.pop_front();
        }
    }

    /// One side now, the other side now or within the window
    fn orbits(&self, pair: &TensionPair, topics: &BTreeSet<TopicLabel>) -> bool {
        let mentioned_recently = |side: &str| {
            topics.contains(side) || self.recent_topics.iter().any(|t| t.contains(side))
        };
        [pair.first(), pair.second()].iter().any(|side| {
            topics.contains(*side)
                && pair.other(side).map(|other| mentioned_recently(other)).unwrap_or(false)
        })
    }

    /// Cycles saturated, no test on the previous ordinary turn, entailment
    /// cooldown passed, and test budget left
    pub fn needs_consequence_test(&self, pair: &TensionPair, turn: u64) -> bool {
        let Some(state) = self.states.get(pair) else {
            return false;
        };
        let saturated = state.cycles >= self.config.cycle_threshold;
        let back_to_back = state
            .last_test_turn
            .map(|t| turn <= t.saturating_add(1))
            .unwrap_or(false);
        let cooled_down = state
            .last_entailment_turn
            .map(|e| turn.saturating_sub(e) >= ENTAILMENT_COOLDOWN_TURNS)
            .unwrap_or(true);
        let budget_left = state.tests < self.config.test_threshold;
        saturated && !back_to_back && cooled_down && budget_left
    }

    /// Test budget spent, and either no entailment since the last test or the
    /// pair has orbited back to saturation since that entailment
    pub fn needs_pivot(&self, pair: &TensionPair) -> bool {
        let Some(state) = self.states.get(pair) else {
            return false;
        };
        if state.tests < self.config.test_threshold {
            return false;
        }
        match (state.last_test_turn, state.last_entailment_turn) {
            (Some(test), Some(entailment)) if entailment > test => {
                state.cycles >= self.config.cycle_threshold
            }
            _ => true,
        }
    }

    /// Entailment landed on ordinary turn `turn` while `pair` was active:
    /// cycles reset, tests kept
    pub fn record_entailment(&mut self, pair: &TensionPair, turn: u64) {
        let state = self.state_mut(pair);
        state.cycles = 0;
        state.last_entailment_turn = Some(turn);
    }

    /// Consequence test injected after ordinary turn `turn`
    pub fn record_test(&mut self, pair: &TensionPair, turn: u64) {
        let max = self.config.test_threshold;
        let state = self.state_mut(pair);
        state.tests = state.tests.saturating_add(1).min(max);
        state.last_test_turn = Some(turn);
    }

    /// Zero the pair's counters (pivot). Discussed flag and entailment history stay.
    pub fn reset(&mut self, pair: &TensionPair) {
        let state = self.state_mut(pair);
        state.cycles = 0;
        state.tests = 0;
        state.last_test_turn = None;
    }

    /// Mark a pair as active/discussed
    pub fn mark_discussed(&mut self, pair: &TensionPair) {
        self.state_mut(pair).discussed = true;
    }

    pub fn discussed(&self, pair: &TensionPair) -> bool {
        self.states.get(pair).map(|s| s.discussed).unwrap_or(false)
    }

    pub fn phase(&self, pair: &TensionPair) -> TensionPhase {
        let Some(state) = self.states.get(pair) else {
            return TensionPhase::Active;
        };
        if state.tests > 0 && self.needs_pivot(pair) {
            TensionPhase::PivotRequired
        } else if state.tests > 0 {
            TensionPhase::Tested
        } else if state.cycles >= self.config.cycle_threshold {
            TensionPhase::Saturated
        } else {
            TensionPhase::Active
        }
    }

    /// Pair with the largest topic overlap with `topics` (catalog order breaks ties)
    pub fn select_by_overlap(&self, topics: &BTreeSet<TopicLabel>) -> Option<TensionPair> {
        let mut best: Option<(&TensionPair, usize)> = None;
        for pair in &self.catalog {
            let overlap = usize::from(topics.contains(pair.first()))
                + usize::from(topics.contains(pair.second()));
            if overlap > 0 && best.map(|(_, b)| overlap > b).unwrap_or(true) {
                best = Some((pair, overlap));
            }
        }
        best.map(|(pair, _)| pair.clone())
    }

    /// Next pair by rotation after `current`, preferring never-discussed pairs
    pub fn next_in_rotation(&self, current: &TensionPair) -> Option<TensionPair> {
        let n = self.catalog.len();
        let start = self.catalog.iter().position(|p| p == current).map(|i| i + 1).unwrap_or(0);
        let rotation: Vec<&TensionPair> = (0..n)
            .map(|offset| &self.catalog[(start + offset) % n])
            .filter(|p| *p != current)
            .collect();

        rotation
            .iter()
            .find(|p| !self.discussed(p))
            .or_else(|| rotation.first())
            .map(|p| (*p).clone())
    }

    pub fn records(&self) -> Vec<TensionRecord> {
        self.states
            .iter()
            .map(|(pair, state)| TensionRecord {
                topics: pair.to_array(),
                cycles: state.cycles,
                tests: state.tests,
                last_entailment_turn: state.last_entailment_turn,
                last_test_turn: state.last_test_turn,
                discussed: state.discussed,
            })
            .collect()
    }

    /// Rebuild from snapshot records plus recent turn topics (oldest first)
    pub fn restore(
        catalog: Vec<TensionPair>,
        config: TensionConfig,
        records: &[TensionRecord],
        recent_topics: Vec<BTreeSet<TopicLabel>>,
    ) -> Self {
        let mut tracker = Self::new(catalog, config);
        for record in records {
            let [a, b] = &record.topics;
            tracker.states.insert(
                TensionPair::new(a.clone(), b.clone()),
                TensionState {
                    cycles: record.cycles,
                    tests: record.tests.min(tracker.config.test_threshold),
                    last_entailment_turn: record.last_entailment_turn,
                    last_test_turn: record.last_test_turn,
                    discussed: record.discussed,
                },
            );
        }
        let skip = recent_topics.len().saturating_sub(tracker.config.orbit_window);
        tracker.recent_topics = recent_topics.into_iter().skip(skip).collect();
        tracker
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TensionCatalog;

    fn tracker() -> TensionTracker {
        TensionTracker::new(TensionCatalog::default().tension_pairs(), TensionConfig::default())
    }

    fn topics(list: &[&str]) -> BTreeSet<TopicLabel> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sa() -> TensionPair {
        TensionPair::new("structure", "agency")
    }

    #[test]
    fn test_one_sided_turns_do_not_cycle() {
        let mut t = tracker();
        t.update(&topics(&["structure"]), None);
        t.update(&topics(&["structure"]), None);
        assert_eq!(t.cycles(&sa()), 0);
    }

    #[test]
    fn test_alternating_sides_cycle() {
        let mut t = tracker();
        t.update(&topics(&["structure"]), None);
        t.update(&topics(&["agency"]), None);
        t.update(&topics(&["structure"]), None);
        assert_eq!(t.cycles(&sa()), 2);
    }

    #[test]
    fn test_other_side_outside_window_does_not_cycle() {
        let mut t = tracker();
        t.update(&topics(&["structure"]), None);
        t.update(&topics(&["reason"]), None);
        t.update(&topics(&["reason"]), None);
        t.update(&topics(&["agency"]), None);
        assert_eq!(t.cycles(&sa()), 0);
    }

    #[test]
    fn test_both_sides_in_one_turn_cycle() {
        let mut t = tracker();
        t.update(&topics(&["structure", "agency"]), None);
        assert_eq!(t.cycles(&sa()), 1);
    }

    #[test]
    fn test_entailment_resets_cycles_not_tests() {
        let mut t = tracker();
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        t.record_test(&sa(), 2);
        t.record_entailment(&sa(), 3);
        assert_eq!(t.cycles(&sa()), 0);
        assert_eq!(t.tests(&sa()), 1);
    }

    #[test]
    fn test_consequence_test_conditions() {
        let mut t = tracker();
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        assert!(!t.needs_consequence_test(&sa(), 1));
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        assert!(t.needs_consequence_test(&sa(), 2));

        t.record_test(&sa(), 2);
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        // No back-to-back tests
        assert!(!t.needs_consequence_test(&sa(), 3));
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        assert!(t.needs_consequence_test(&sa(), 4));
    }

    #[test]
    fn test_entailment_cooldown() {
        let mut t = tracker();
        t.record_entailment(&sa(), 5);
        for _ in 0..2 {
            t.update(&topics(&["structure", "agency"]), Some(&sa()));
        }
        assert!(!t.needs_consequence_test(&sa(), 6));
        assert!(t.needs_consequence_test(&sa(), 7));
    }

    #[test]
    fn test_pivot_after_test_budget() {
        let mut t = tracker();
        t.record_test(&sa(), 2);
        assert!(!t.needs_pivot(&sa()));
        t.record_test(&sa(), 4);
        assert!(t.needs_pivot(&sa()));
        assert_eq!(t.phase(&sa()), TensionPhase::PivotRequired);
    }

    #[test]
    fn test_entailment_after_last_test_blocks_pivot() {
        let mut t = tracker();
        t.record_test(&sa(), 2);
        t.record_test(&sa(), 4);
        t.record_entailment(&sa(), 5);
        assert!(!t.needs_pivot(&sa()));
    }

    #[test]
    fn test_resaturation_after_entailment_forces_pivot() {
        let mut t = tracker();
        t.record_test(&sa(), 3);
        t.record_test(&sa(), 5);
        t.record_entailment(&sa(), 6);
        assert!(!t.needs_pivot(&sa()));

        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        assert!(!t.needs_pivot(&sa()));
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        assert!(t.needs_pivot(&sa()));
        assert_eq!(t.phase(&sa()), TensionPhase::PivotRequired);
    }

    #[test]
    fn test_tests_clamped_to_threshold() {
        let mut t = tracker();
        for i in 0..5 {
            t.record_test(&sa(), i * 2);
        }
        assert_eq!(t.tests(&sa()), 2);
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let mut t = tracker();
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        t.record_test(&sa(), 1);
        t.reset(&sa());
        assert_eq!(t.cycles(&sa()), 0);
        assert_eq!(t.tests(&sa()), 0);
        assert!(t.discussed(&sa()));
    }

    #[test]
    fn test_select_by_overlap() {
        let t = tracker();
        assert_eq!(t.select_by_overlap(&topics(&["agency"])), Some(sa()));
        assert_eq!(
            t.select_by_overlap(&topics(&["agency", "necessity", "contingency"])),
            Some(TensionPair::new("necessity", "contingency"))
        );
        assert_eq!(t.select_by_overlap(&topics(&[])), None);
    }

    #[test]
    fn test_rotation_prefers_undiscussed() {
        let mut t = tracker();
        t.mark_discussed(&sa());
        t.mark_discussed(&TensionPair::new("necessity", "contingency"));
        assert_eq!(
            t.next_in_rotation(&sa()),
            Some(TensionPair::new("individual", "collective"))
        );
    }

    #[test]
    fn test_rotation_wraps_when_all_discussed() {
        let mut t = tracker();
        for pair in t.catalog().to_vec() {
            t.mark_discussed(&pair);
        }
        let last = TensionPair::new("reason", "passion");
        assert_eq!(t.next_in_rotation(&last), Some(sa()));
    }

    #[test]
    fn test_phases() {
        let mut t = tracker();
        assert_eq!(t.phase(&sa()), TensionPhase::Active);
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        t.update(&topics(&["structure", "agency"]), Some(&sa()));
        assert_eq!(t.phase(&sa()), TensionPhase::Saturated);
        t.record_test(&sa(), 2);
        assert_eq!(t.phase(&sa()), TensionPhase::Tested);
    }
}
