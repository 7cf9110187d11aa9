//! Progression Controller: refinement loop and intervention state machine
//!
//! Per candidate turn:
//!   Proposed → (Redundant | NoEntailment) → revise → ... → Accepted → Committed
//!
//! At most `max_attempts` revisions are requested, so the generator is called
//! at most `max_attempts + 1` times. After commit the trackers are updated in
//! a fixed order and at most one of {pivot, consequence test} is emitted,
//! plus a synthesis when the cadence is due.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::core::conversation::ConversationState;
use crate::core::embedding::{Embedder, NullEmbedder};
use crate::core::entailment::EntailmentDetector;
use crate::core::generator::TurnGenerator;
use crate::core::redundancy::RedundancyChecker;
use crate::core::topic_extractor::TopicExtractor;
use crate::error::{ConfigError, EngineError, EngineResult, GeneratorError};
use crate::types::{
    AttemptRecord, CandidateState, DyadKey, EntailmentReport, History, Intervention,
    InterventionKind, MoveKind, ReasonCode, RedundancyVerdict, RefinementReport,
    SessionSnapshot, TensionPair, TensionPhase, TopicLabel, Turn, TurnOutcome,
};
use crate::{REVISION_ADD_ENTAILMENT, REVISION_AVOID_REPETITION};

/// Characters of the challenged claim quoted in a consequence test
const CLAIM_EXCERPT_CHARS: usize = 160;

/// Detector results for one draft
#[derive(Debug)]
struct Evaluation {
    text: String,
    topics: BTreeSet<TopicLabel>,
    report: EntailmentReport,
    verdict: RedundancyVerdict,
    /// Draft embedding shared by the detectors, cached on commit
    vector: Option<Vec<f32>>,
}

/// Quality gate and pacing engine for one conversation
#[derive(Debug)]
pub struct ProgressionController {
    config: EngineConfig,
    topics: TopicExtractor,
    entailment: EntailmentDetector,
    redundancy: RedundancyChecker,
    state: ConversationState,
}

impl ProgressionController {
    /// Controller with semantic topic fallback and embedding redundancy
    pub async fn new(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        config.validate()?;
        let topics = TopicExtractor::build(&config.catalog, config.topics.clone(), embedder.clone()).await?;
        Self::assemble(config, topics, embedder)
    }

    /// Controller without an embedder: keyword topics, lexical redundancy
    pub fn keyword_only(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let topics = TopicExtractor::keyword_only(&config.catalog, config.topics.clone())?;
        Self::assemble(config, topics, Arc::new(NullEmbedder::new()))
    }

    /// Resume from a snapshot. Turns in the redundancy window are embedded
    /// here so later checks hit the cache.
    pub async fn restore(
        snapshot: &SessionSnapshot,
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        let mut controller = Self::new(config, embedder).await?;
        if snapshot.catalog_version != controller.config.catalog.version {
            warn!(
                snapshot = %snapshot.catalog_version,
                config = %controller.config.catalog.version,
                "restoring across tension catalog versions"
            );
        }
        controller.state = ConversationState::restore(snapshot, &controller.config);

        let window: Vec<Turn> = controller
            .state
            .history
            .recent_ordinary(controller.redundancy.window())
            .into_iter()
            .cloned()
            .collect();
        for turn in &window {
            controller.redundancy.remember(turn).await;
        }
        info!(turns = controller.state.history.len(), warmed = window.len(), "session restored");
        Ok(controller)
    }

    fn assemble(
        config: EngineConfig,
        topics: TopicExtractor,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigError> {
        let entailment = EntailmentDetector::from_catalog(&config.entailment)?;
        let redundancy = RedundancyChecker::new(embedder, config.redundancy.clone());
        let state = ConversationState::new(&config);
        Ok(Self {
            config,
            topics,
            entailment,
            redundancy,
            state,
        })
    }

    // =========================================================================
    // REFINEMENT LOOP
    // =========================================================================

    /// Draw drafts from `generator` until one passes both checks or the budget
    /// runs out, commit the chosen draft, and return the resulting interventions.
    #[instrument(skip(self, generator))]
    pub async fn propose_and_commit<G>(&mut self, speaker: &str, generator: &mut G) -> EngineResult<TurnOutcome>
    where
        G: TurnGenerator + ?Sized,
    {
        let deadline = self
            .config
            .refinement
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let max_revisions = self.config.refinement.max_attempts;

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut candidates: Vec<Evaluation> = Vec::new();
        let mut instruction: Option<&'static str> = None;
        let mut calls = 0u32;

        let outcome = loop {
            let draft = match draw(generator, instruction, deadline).await? {
                Some(draft) => draft,
                None if candidates.is_empty() => {
                    warn!(speaker, "session deadline elapsed before the first draft");
                    return Err(EngineError::GeneratorTimeout);
                }
                None => {
                    warn!(speaker, attempts = attempts.len(), "session deadline elapsed, taking best draft");
                    break ReasonCode::R105_BEST_EFFORT_TIMEOUT;
                }
            };
            calls += 1;

            let evaluation = self.evaluate(draft).await;
            let redundant = evaluation.verdict.redundant;
            let entailed = evaluation.report.has_entailment();
            let state = if redundant {
                CandidateState::RedundantRetry
            } else if !entailed {
                CandidateState::NoEntailmentRetry
            } else {
                CandidateState::Accepted
            };
            let attempt = attempts.len() as u32;
            debug!(
                attempt,
                score = evaluation.verdict.score,
                redundant,
                entailed,
                state = %state,
                "draft checked"
            );

            attempts.push(AttemptRecord {
                attempt,
                instruction: instruction.map(str::to_string),
                text: evaluation.text.clone(),
                redundancy_score: evaluation.verdict.score,
                redundant,
                entailments: evaluation.report.tags.clone(),
                state,
            });
            candidates.push(evaluation);

            if state == CandidateState::Accepted {
                break ReasonCode::R101_DRAFT_ACCEPTED;
            }
            if attempt >= max_revisions {
                break ReasonCode::R104_BEST_EFFORT_MAX_ATTEMPTS;
            }
            instruction = Some(if redundant {
                REVISION_AVOID_REPETITION
            } else {
                REVISION_ADD_ENTAILMENT
            });
        };

        let chosen = if outcome == ReasonCode::R101_DRAFT_ACCEPTED {
            candidates.len() - 1
        } else {
            best_attempt(&attempts)
        };
        let best_effort = outcome.is_best_effort();
        attempts[chosen].state = CandidateState::Committed;
        let evaluation = candidates.swap_remove(chosen);

        let index = self.state.history.next_index();
        let turn = Turn {
            index,
            speaker: speaker.to_string(),
            text: evaluation.text,
            topics: evaluation.topics,
            entailments: evaluation.report.tags,
            kind: MoveKind::Ordinary,
            best_effort,
            redundancy_score: evaluation.verdict.score,
            committed_at: Utc::now(),
        };
        let turn = self.state.history.push(turn).clone();
        match evaluation.vector {
            Some(vector) => self.redundancy.cache_embedding(index, vector),
            None => self.redundancy.remember(&turn).await,
        }

        let interventions = self.advance(&turn);
        info!(
            index,
            outcome = outcome.code(),
            calls,
            interventions = interventions.len(),
            "turn committed"
        );

        Ok(TurnOutcome {
            turn,
            interventions,
            refinement: RefinementReport {
                attempts,
                generator_calls: calls,
                outcome,
                best_effort,
            },
        })
    }

    /// Embed the draft at most once, then run the three detectors concurrently
    async fn evaluate(&self, text: String) -> Evaluation {
        let recent = self.state.history.recent_ordinary(self.redundancy.window());
        let vector = if !recent.is_empty() || self.topics.needs_fallback(&text) {
            self.redundancy.embed_candidate(&text).await
        } else {
            None
        };
        let (topics, report, verdict) = tokio::join!(
            async { self.topics.extract_with(&text, vector.as_deref()) },
            async { self.entailment.analyze(&text) },
            self.redundancy.is_redundant_with(&text, vector.as_deref(), &recent),
        );
        Evaluation {
            text,
            topics,
            report,
            verdict,
            vector,
        }
    }

    /// Topics and entailment tags of a free text, without committing anything
    pub async fn analyze(&self, text: &str) -> (BTreeSet<TopicLabel>, EntailmentReport) {
        tokio::join!(self.topics.extract(text), async { self.entailment.analyze(text) })
    }

    // =========================================================================
    // POST-COMMIT STATE MACHINE
    // =========================================================================

    /// Tracker updates for a committed ordinary turn, in order:
    /// dyad → tension → active pair → entailment → pivot/test → synthesis
    ///
    /// Tension distances use the ordinary-turn ordinal, so committed
    /// interventions between two replies do not count.
    fn advance(&mut self, turn: &Turn) -> Vec<Intervention> {
        let index = turn.index;
        let ordinal = self.state.history.ordinary_count();

        self.state.dyads.record_turn(&turn.speaker);
        if let Some(dyad) = self.state.dyads.current() {
            if self.state.dyads.budget_exceeded(dyad) {
                debug!(
                    dyad = %dyad,
                    code = ReasonCode::R301_DYAD_BUDGET_EXCEEDED.code(),
                    "volley budget spent, rotation advised"
                );
            }
        }

        self.state.tensions.update(&turn.topics, self.state.active.as_ref());

        if self.state.active.is_none() {
            if let Some(pair) = self.state.tensions.select_by_overlap(&turn.topics) {
                info!(pair = %pair, index, "active tension selected");
                self.state.tensions.mark_discussed(&pair);
                self.state.active = Some(pair);
            }
        }

        let mut interventions = Vec::new();
        if let Some(active) = self.state.active.clone() {
            if turn.has_entailment() {
                self.state.tensions.record_entailment(&active, ordinal);
            }
            if self.state.tensions.needs_pivot(&active) {
                interventions.push(self.pivot(&active, index));
            } else if self.state.tensions.needs_consequence_test(&active, ordinal) {
                self.state.tensions.record_test(&active, ordinal);
                interventions.push(self.consequence_test(&active, index));
            }
        }

        if index.saturating_sub(self.state.last_synthesis_index) >= self.config.synthesis.cadence {
            interventions.push(self.synthesis(index));
        }

        interventions
    }

    fn consequence_test(&self, pair: &TensionPair, index: u64) -> Intervention {
        let claim = self
            .state
            .history
            .last_substantive()
            .map(|t| format!("{} said (turn {}): \"{}\"", t.speaker, t.index, t.excerpt(CLAIM_EXCERPT_CHARS)))
            .unwrap_or_else(|| "The last claim".to_string());
        info!(pair = %pair, index, tests = self.state.tensions.tests(pair), "consequence test");

        Intervention::new(
            InterventionKind::ConsequenceTest,
            format!(
                "Consequence test on {}. {} If that is true, what follows in a concrete case? \
                 Answer with an implication, an application, a counterexample, or a test that could settle it.",
                pair, claim
            ),
            ReasonCode::R201_TENSION_SATURATED,
            Some(pair),
            index,
        )
    }

    fn pivot(&mut self, saturated: &TensionPair, index: u64) -> Intervention {
        let next = self
            .state
            .tensions
            .next_in_rotation(saturated)
            .unwrap_or_else(|| saturated.clone());

        self.state.tensions.reset(saturated);
        self.state.tensions.mark_discussed(&next);
        self.state.active = Some(next.clone());
        self.state.dyads.reset_all();
        self.state.last_pivot_index = Some(index);
        info!(from = %saturated, to = %next, index, "pivot");

        Intervention::new(
            InterventionKind::Pivot,
            format!(
                "Pivot: {} has stopped producing new consequences. Set it aside and take up {}: \
                 state a position and one concrete consequence of it.",
                saturated, next
            ),
            ReasonCode::R202_TESTS_EXHAUSTED,
            Some(&next),
            index,
        )
    }

    fn synthesis(&mut self, index: u64) -> Intervention {
        let from = self.state.last_synthesis_index + 1;
        self.state.last_synthesis_index = index;
        let focus = self
            .state
            .active
            .as_ref()
            .map(|p| format!(" on {}", p))
            .unwrap_or_default();
        info!(from, to = index, "synthesis due");

        Intervention::new(
            InterventionKind::Synthesis,
            format!(
                "Synthesis of turns {}-{}{}: what has been established, what remains contested, \
                 and the one question to take up next.",
                from, index, focus
            ),
            ReasonCode::R203_SYNTHESIS_CADENCE,
            self.state.active.as_ref(),
            index,
        )
    }

    /// Append a rendered intervention to the history.
    ///
    /// No quality checks and no tracker updates. A synthesis turn moves the
    /// synthesis cadence to its own index.
    pub async fn commit_intervention(&mut self, intervention: &Intervention, speaker: &str) -> Turn {
        let (topics, report) = self.analyze(&intervention.payload).await;
        let index = self.state.history.next_index();

        let mut turn = Turn::new(index, speaker, intervention.payload.clone())
            .with_kind(intervention.kind.move_kind());
        turn.topics = topics;
        turn.entailments = report.tags;

        if intervention.kind == InterventionKind::Synthesis {
            self.state.last_synthesis_index = index;
        }
        debug!(index, kind = %turn.kind, "intervention committed");
        self.state.history.push(turn).clone()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Pair that exhausted its volley budget, for an external speaker scheduler
    pub fn rotation_advice(&self) -> Option<DyadKey> {
        self.state
            .dyads
            .current()
            .filter(|dyad| self.state.dyads.budget_exceeded(dyad))
            .cloned()
    }

    pub fn tension_phase(&self, pair: &TensionPair) -> TensionPhase {
        self.state.tensions.phase(pair)
    }

    pub fn active_tension(&self) -> Option<&TensionPair> {
        self.state.active.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.state.history
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot(&self.config.catalog.version)
    }
}

/// One generator call, bounded by the session deadline. `None` = deadline elapsed.
async fn draw<G>(
    generator: &mut G,
    revision: Option<&str>,
    deadline: Option<Instant>,
) -> Result<Option<String>, GeneratorError>
where
    G: TurnGenerator + ?Sized,
{
    match deadline {
        None => generator.generate(revision).await.map(Some),
        Some(deadline) => match timeout_at(deadline, generator.generate(revision)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
    }
}

/// Most checks passed, then lowest redundancy, then latest
fn best_attempt(attempts: &[AttemptRecord]) -> usize {
    let mut best = 0;
    for (i, attempt) in attempts.iter().enumerate().skip(1) {
        let current = &attempts[best];
        let better = attempt.checks_passed() > current.checks_passed()
            || (attempt.checks_passed() == current.checks_passed()
                && attempt.redundancy_score <= current.redundancy_score);
        if better {
            best = i;
        }
    }
    best
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generator::ScriptedGenerator;
    use crate::types::EntailmentTag;

    fn controller() -> ProgressionController {
        ProgressionController::keyword_only(EngineConfig::default()).unwrap()
    }

    fn attempt(n: u32, redundant: bool, entailed: bool, score: f64) -> AttemptRecord {
        let mut entailments = BTreeSet::new();
        if entailed {
            entailments.insert(EntailmentTag::Implication);
        }
        AttemptRecord {
            attempt: n,
            instruction: None,
            text: format!("draft {}", n),
            redundancy_score: score,
            redundant,
            entailments,
            state: CandidateState::Proposed,
        }
    }

    #[test]
    fn test_best_attempt_prefers_more_checks() {
        let attempts = vec![
            attempt(0, true, true, 0.9),
            attempt(1, false, true, 0.2),
            attempt(2, false, false, 0.1),
        ];
        assert_eq!(best_attempt(&attempts), 1);
    }

    #[test]
    fn test_best_attempt_ties_break_on_score_then_latest() {
        let attempts = vec![
            attempt(0, false, false, 0.3),
            attempt(1, false, false, 0.1),
            attempt(2, false, false, 0.1),
            attempt(3, false, false, 0.5),
        ];
        assert_eq!(best_attempt(&attempts), 2);
    }

    #[tokio::test]
    async fn test_first_draft_accepted() {
        let mut c = controller();
        let mut gen = ScriptedGenerator::single(
            "In practice, if structure binds choice, then blame requires a threshold we could test.",
        );
        let outcome = c.propose_and_commit("A", &mut gen).await.unwrap();
        assert_eq!(outcome.refinement.outcome, ReasonCode::R101_DRAFT_ACCEPTED);
        assert_eq!(outcome.refinement.generator_calls, 1);
        assert_eq!(outcome.turn.index, 1);
        assert!(!outcome.turn.best_effort);
        assert_eq!(outcome.refinement.attempts[0].state, CandidateState::Committed);
        assert_eq!(c.history().len(), 1);
    }

    #[tokio::test]
    async fn test_revision_then_accept() {
        let mut c = controller();
        let mut gen = ScriptedGenerator::new([
            "Structure matters a great deal.",
            "If structure binds choice, then blame must be graded.",
        ]);
        let outcome = c.propose_and_commit("A", &mut gen).await.unwrap();
        assert_eq!(outcome.refinement.generator_calls, 2);
        assert_eq!(
            gen.requests(),
            &[None, Some(REVISION_ADD_ENTAILMENT.to_string())]
        );
        assert_eq!(outcome.refinement.attempts[0].state, CandidateState::NoEntailmentRetry);
        assert!(outcome.turn.has_entailment());
    }

    #[tokio::test]
    async fn test_best_effort_after_max_attempts() {
        let mut c = controller();
        let mut gen = ScriptedGenerator::single("Structure matters a great deal.");
        let outcome = c.propose_and_commit("A", &mut gen).await.unwrap();
        assert_eq!(outcome.refinement.outcome, ReasonCode::R104_BEST_EFFORT_MAX_ATTEMPTS);
        assert_eq!(outcome.refinement.generator_calls, 4);
        assert_eq!(gen.calls(), 4);
        assert!(outcome.turn.best_effort);
    }

    #[tokio::test]
    async fn test_generator_error_propagates() {
        let mut c = controller();
        let mut gen = ScriptedGenerator::new(Vec::<String>::new());
        let err = c.propose_and_commit("A", &mut gen).await.unwrap_err();
        assert!(matches!(err, EngineError::Generator(GeneratorError::Exhausted)));
        assert!(c.history().is_empty());
    }

    #[tokio::test]
    async fn test_commit_intervention_skips_trackers() {
        let mut c = controller();
        let intervention = Intervention::new(
            InterventionKind::Synthesis,
            "Synthesis of turns 1-12",
            ReasonCode::R203_SYNTHESIS_CADENCE,
            None,
            12,
        );
        let turn = c.commit_intervention(&intervention, "moderator").await;
        assert_eq!(turn.kind, MoveKind::Synthesis);
        assert_eq!(c.state().last_synthesis_index(), 1);
        assert!(c.state().dyads().last_speaker().is_none());
    }
}
