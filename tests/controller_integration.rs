//! Integration tests for the progression controller
//!
//! Refinement loop, dyad bound, tension interventions and synthesis cadence,
//! driven by scripted generators and stub embedders.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

use volley::config::EngineConfig;
use volley::core::{Embedder, HashingEmbedder, ProgressionController, ScriptedGenerator, TurnGenerator};
use volley::error::{EmbedError, EngineError, GeneratorError};
use volley::types::{
    CandidateState, DyadKey, EntailmentTag, InterventionKind, MoveKind, ReasonCode,
    TensionPair, TensionPhase, TurnOutcome,
};
use volley::{REVISION_ADD_ENTAILMENT, REVISION_AVOID_REPETITION};

/// Entailing sentences with no catalog topic keywords
const NEUTRAL: &[&str] = &[
    "If the bridge carries trucks, then the steel beams must be thicker.",
    "For example, a bakery that raises prices loses its morning customers.",
    "The drainage plan fails when rainfall exceeds the canal capacity.",
    "We could measure commute times before and after the tram line opens.",
    "Therefore the archive needs a second copy stored offsite.",
    "In practice, gardeners rotate crops every spring to protect the soil.",
    "Consequently the ferry schedule shifts an hour later in winter.",
    "If tariffs rise, then importers stock up months ahead.",
    "For instance, libraries that open late draw more students.",
    "This pricing model breaks down when fuel costs double.",
    "We should check whether vaccine uptake differs by region.",
    "It follows that the orchard needs more bees next season.",
    "Concretely, the clinic could test shorter appointment slots.",
    "If the river floods, then the market moves uphill.",
];

fn keyword_controller(config: EngineConfig) -> ProgressionController {
    ProgressionController::keyword_only(config).unwrap()
}

async fn say(controller: &mut ProgressionController, speaker: &str, text: &str) -> TurnOutcome {
    let mut gen = ScriptedGenerator::single(text);
    controller.propose_and_commit(speaker, &mut gen).await.unwrap()
}

fn structure_agency() -> TensionPair {
    TensionPair::new("structure", "agency")
}

// =============================================================================
// REFINEMENT LOOP
// =============================================================================

/// Maps known texts to fixed vectors; anything else is unavailable
struct StubEmbedder {
    table: Vec<(&'static str, Vec<f32>)>,
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.table
            .iter()
            .find(|(t, _)| *t == text)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EmbedError::Unavailable("not in table".to_string()))
    }
}

const PRIOR: &str = "If wages rise, then prices follow.";
const NEAR: &str = "If wages climb, then prices follow soon.";
const FRESH: &str = "For example, a bakery that raises prices loses customers.";

fn stub_embedder() -> Arc<dyn Embedder> {
    // cos(PRIOR, NEAR) = 0.91, cos(PRIOR, FRESH) = 0
    Arc::new(StubEmbedder {
        table: vec![
            (PRIOR, vec![1.0, 0.0]),
            (NEAR, vec![0.91, (1.0f32 - 0.91 * 0.91).sqrt()]),
            (FRESH, vec![0.0, 1.0]),
        ],
    })
}

#[tokio::test]
async fn test_near_duplicate_triggers_avoid_repetition() {
    let mut controller = ProgressionController::new(EngineConfig::default(), stub_embedder())
        .await
        .unwrap();
    say(&mut controller, "A", PRIOR).await;

    let mut gen = ScriptedGenerator::new([NEAR, FRESH]);
    let outcome = controller.propose_and_commit("B", &mut gen).await.unwrap();

    assert_eq!(
        gen.requests(),
        &[None, Some(REVISION_AVOID_REPETITION.to_string())]
    );
    let first = &outcome.refinement.attempts[0];
    assert_eq!(first.state, CandidateState::RedundantRetry);
    assert!(first.redundant);
    assert!((first.redundancy_score - 0.91).abs() < 1e-3);

    assert_eq!(outcome.turn.text, FRESH);
    assert_eq!(outcome.refinement.outcome, ReasonCode::R101_DRAFT_ACCEPTED);
    assert!(!outcome.turn.best_effort);
}

/// Hashing embedder that counts calls
#[derive(Default)]
struct CountingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }
}

#[tokio::test]
async fn test_draft_embedded_once_for_topics_and_redundancy() {
    let embedder = Arc::new(CountingEmbedder::default());
    let mut controller = ProgressionController::new(EngineConfig::default(), embedder.clone())
        .await
        .unwrap();
    say(&mut controller, "A", NEUTRAL[0]).await;

    // Keyword-free draft: topic fallback and redundancy both need its vector
    let before = embedder.calls();
    let outcome = say(&mut controller, "B", NEUTRAL[1]).await;
    assert_eq!(outcome.refinement.generator_calls, 1);
    assert_eq!(embedder.calls() - before, 1);
}

#[tokio::test]
async fn test_missing_entailment_triggers_add_entailment() {
    let mut controller = keyword_controller(EngineConfig::default());
    let mut gen = ScriptedGenerator::new([
        "Wages and prices are related.",
        "If wages rise, then prices follow within a quarter.",
    ]);
    let outcome = controller.propose_and_commit("A", &mut gen).await.unwrap();

    assert_eq!(gen.requests(), &[None, Some(REVISION_ADD_ENTAILMENT.to_string())]);
    assert_eq!(outcome.refinement.attempts[0].state, CandidateState::NoEntailmentRetry);
    assert_eq!(outcome.refinement.attempts[1].state, CandidateState::Committed);
    assert!(outcome.turn.entailments.contains(&EntailmentTag::Implication));
}

#[tokio::test]
async fn test_loop_terminates_within_max_attempts_plus_one() {
    for max_attempts in [1u32, 2, 3, 5] {
        let mut config = EngineConfig::default();
        config.refinement.max_attempts = max_attempts;
        let mut controller = keyword_controller(config);

        let mut gen = ScriptedGenerator::single("Nothing new to add here.");
        let outcome = controller.propose_and_commit("A", &mut gen).await.unwrap();

        assert_eq!(gen.calls(), max_attempts as usize + 1);
        assert_eq!(outcome.refinement.generator_calls, max_attempts + 1);
        assert_eq!(outcome.refinement.outcome, ReasonCode::R104_BEST_EFFORT_MAX_ATTEMPTS);
        assert!(outcome.turn.best_effort);
        assert_eq!(controller.history().len(), 1);
    }
}

#[tokio::test]
async fn test_best_effort_picks_draft_passing_most_checks() {
    let mut config = EngineConfig::default();
    config.refinement.max_attempts = 2;
    let mut controller = keyword_controller(config);
    say(&mut controller, "A", PRIOR).await;

    // Redundant with entailment, then fresh without, then redundant again
    let mut gen = ScriptedGenerator::new([
        PRIOR,
        "Bread is getting expensive lately.",
        PRIOR,
    ]);
    let outcome = controller.propose_and_commit("B", &mut gen).await.unwrap();

    assert_eq!(outcome.refinement.generator_calls, 3);
    assert!(outcome.turn.best_effort);
    // All pass one check; the fresh draft has the lowest redundancy
    assert_eq!(outcome.turn.text, "Bread is getting expensive lately.");
    assert_eq!(outcome.refinement.attempts[1].state, CandidateState::Committed);
}

/// Returns each draft after its delay
struct DelayedGenerator {
    drafts: VecDeque<(u64, &'static str)>,
    calls: usize,
}

#[async_trait]
impl TurnGenerator for DelayedGenerator {
    async fn generate(&mut self, _revision: Option<&str>) -> Result<String, GeneratorError> {
        self.calls += 1;
        let (delay, text) = self.drafts.pop_front().ok_or(GeneratorError::Exhausted)?;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(text.to_string())
    }
}

#[tokio::test]
async fn test_timeout_before_first_draft_fails_turn() {
    let mut config = EngineConfig::default();
    config.refinement.timeout_ms = Some(20);
    let mut controller = keyword_controller(config);

    let mut gen = DelayedGenerator {
        drafts: VecDeque::from([(2_000, PRIOR)]),
        calls: 0,
    };
    let err = controller.propose_and_commit("A", &mut gen).await.unwrap_err();
    assert!(matches!(err, EngineError::GeneratorTimeout));
    assert!(controller.history().is_empty());
}

#[tokio::test]
async fn test_timeout_after_first_draft_accepts_best_effort() {
    let mut config = EngineConfig::default();
    config.refinement.timeout_ms = Some(100);
    let mut controller = keyword_controller(config);

    let mut gen = DelayedGenerator {
        drafts: VecDeque::from([(0, "Wages and prices are related."), (5_000, PRIOR)]),
        calls: 0,
    };
    let outcome = controller.propose_and_commit("A", &mut gen).await.unwrap();
    assert_eq!(gen.calls, 2);
    assert_eq!(outcome.refinement.generator_calls, 1);
    assert_eq!(outcome.refinement.outcome, ReasonCode::R105_BEST_EFFORT_TIMEOUT);
    assert!(outcome.turn.best_effort);
    assert_eq!(outcome.turn.text, "Wages and prices are related.");
}

#[tokio::test]
async fn test_generator_failure_commits_nothing() {
    let mut controller = keyword_controller(EngineConfig::default());
    let mut gen = DelayedGenerator {
        drafts: VecDeque::new(),
        calls: 0,
    };
    let err = controller.propose_and_commit("A", &mut gen).await.unwrap_err();
    assert!(matches!(err, EngineError::Generator(GeneratorError::Exhausted)));
    assert_eq!(controller.history().next_index(), 1);
}

// =============================================================================
// DYAD BOUND
// =============================================================================

#[tokio::test]
async fn test_dyad_volleys_never_exceed_max() {
    let mut controller = keyword_controller(EngineConfig::default());
    let ab = DyadKey::new("A", "B");

    for (i, text) in NEUTRAL.iter().take(6).enumerate() {
        let speaker = if i % 2 == 0 { "A" } else { "B" };
        say(&mut controller, speaker, text).await;
        assert!(controller.state().dyads().volleys(&ab) <= 2);
    }
    assert_eq!(controller.rotation_advice(), Some(ab));
}

#[tokio::test]
async fn test_rotation_advice_clears_when_third_speaker_joins() {
    let mut controller = keyword_controller(EngineConfig::default());
    say(&mut controller, "A", NEUTRAL[0]).await;
    say(&mut controller, "B", NEUTRAL[1]).await;
    say(&mut controller, "A", NEUTRAL[2]).await;
    assert_eq!(controller.rotation_advice(), Some(DyadKey::new("A", "B")));

    say(&mut controller, "C", NEUTRAL[3]).await;
    assert_eq!(controller.rotation_advice(), None);
    assert_eq!(controller.state().dyads().volleys(&DyadKey::new("A", "B")), 0);
}

// =============================================================================
// TENSIONS
// =============================================================================

#[tokio::test]
async fn test_blame_threshold_sentence_selects_pair_and_resets_cycles() {
    let mut controller = keyword_controller(EngineConfig::default());
    let outcome = say(
        &mut controller,
        "A",
        "In practice, if structure binds choice, then blame requires a threshold we could test",
    )
    .await;

    let expected: BTreeSet<EntailmentTag> = [
        EntailmentTag::Implication,
        EntailmentTag::Application,
        EntailmentTag::Test,
    ]
    .into_iter()
    .collect();
    assert_eq!(outcome.turn.entailments, expected);
    let topics: BTreeSet<String> = ["agency", "structure"].iter().map(|s| s.to_string()).collect();
    assert_eq!(outcome.turn.topics, topics);
    assert_eq!(controller.active_tension(), Some(&structure_agency()));
    assert_eq!(controller.state().tensions().cycles(&structure_agency()), 0);
    assert!(outcome.interventions.is_empty());
}

/// Three non-entailing turns orbiting structure/agency
async fn orbit_three(controller: &mut ProgressionController) -> TurnOutcome {
    say(controller, "A", "Structure shapes everything we see.").await;
    let second = say(controller, "B", "Agency is what people exercise daily.").await;
    assert!(second.interventions.is_empty());
    say(controller, "A", "Institutions still limit what anyone can do.").await
}

#[tokio::test]
async fn test_consequence_test_after_two_cycles() {
    let mut controller = keyword_controller(EngineConfig::default());
    let third = orbit_three(&mut controller).await;

    assert_eq!(controller.active_tension(), Some(&structure_agency()));
    assert_eq!(third.interventions.len(), 1);
    let test = &third.interventions[0];
    assert_eq!(test.kind, InterventionKind::ConsequenceTest);
    assert_eq!(test.code, ReasonCode::R201_TENSION_SATURATED);
    assert_eq!(test.pair(), Some(structure_agency()));
    assert_eq!(test.after_turn, 3);
    assert!(test.payload.contains("Institutions still limit"));
    assert_eq!(controller.tension_phase(&structure_agency()), TensionPhase::Tested);
}

#[tokio::test]
async fn test_entailment_resets_cycles_and_suppresses_test() {
    let mut controller = keyword_controller(EngineConfig::default());
    say(&mut controller, "A", "Structure shapes everything we see.").await;
    say(&mut controller, "B", "Agency is what people exercise daily.").await;
    let third = say(&mut controller, "A", "If institutions limit us, then blame shrinks.").await;

    assert!(third.turn.has_entailment());
    assert_eq!(controller.state().tensions().cycles(&structure_agency()), 0);
    assert!(third.interventions.is_empty());
}

#[tokio::test]
async fn test_no_back_to_back_consequence_tests() {
    let mut controller = keyword_controller(EngineConfig::default());
    orbit_three(&mut controller).await;

    let fourth = say(&mut controller, "B", "Blame still lands on whoever decides.").await;
    assert!(fourth.interventions.is_empty());

    let fifth = say(&mut controller, "A", "The system decides for us.").await;
    assert_eq!(fifth.interventions.len(), 1);
    assert_eq!(fifth.interventions[0].kind, InterventionKind::ConsequenceTest);
    assert_eq!(controller.state().tensions().tests(&structure_agency()), 2);
}

#[tokio::test]
async fn test_pivot_after_test_budget_spent() {
    let mut controller = keyword_controller(EngineConfig::default());
    orbit_three(&mut controller).await;
    say(&mut controller, "B", "Blame still lands on whoever decides.").await;
    say(&mut controller, "A", "The system decides for us.").await;

    let sixth = say(&mut controller, "B", "Choices belong to each of us.").await;
    assert_eq!(sixth.interventions.len(), 1);
    let pivot = &sixth.interventions[0];
    assert_eq!(pivot.kind, InterventionKind::Pivot);
    assert_eq!(pivot.code, ReasonCode::R202_TESTS_EXHAUSTED);

    let next = TensionPair::new("necessity", "contingency");
    assert_eq!(pivot.pair(), Some(next.clone()));
    assert_eq!(controller.active_tension(), Some(&next));
    assert_eq!(controller.state().last_pivot_index(), Some(6));
    assert_eq!(controller.state().tensions().tests(&structure_agency()), 0);
    assert_eq!(controller.state().tensions().cycles(&structure_agency()), 0);
    assert!(controller
        .state()
        .dyads()
        .records()
        .iter()
        .all(|d| d.volleys == 0));
}

#[tokio::test]
async fn test_committed_interventions_keep_test_spacing() {
    let mut controller = keyword_controller(EngineConfig::default());
    let third = orbit_three(&mut controller).await;
    let turn = controller
        .commit_intervention(&third.interventions[0], "moderator")
        .await;
    assert_eq!(turn.index, 4);

    // The reply to a test is adjacent to it, whatever sits between them
    let reply = say(&mut controller, "B", "Blame still lands on whoever decides.").await;
    assert_eq!(reply.turn.index, 5);
    assert!(reply.interventions.is_empty());

    let next = say(&mut controller, "A", "The system decides for us.").await;
    assert_eq!(next.interventions.len(), 1);
    assert_eq!(next.interventions[0].kind, InterventionKind::ConsequenceTest);
    assert_eq!(next.interventions[0].after_turn, 6);
    controller
        .commit_intervention(&next.interventions[0], "moderator")
        .await;

    let last = say(&mut controller, "B", "Choices belong to each of us.").await;
    assert_eq!(last.interventions.len(), 1);
    assert_eq!(last.interventions[0].kind, InterventionKind::Pivot);
    assert_eq!(controller.state().last_pivot_index(), Some(8));
}

#[tokio::test]
async fn test_orbit_after_spent_budget_and_entailment_pivots() {
    let mut controller = keyword_controller(EngineConfig::default());
    orbit_three(&mut controller).await;
    say(&mut controller, "B", "Blame still lands on whoever decides.").await;
    say(&mut controller, "A", "The system decides for us.").await;
    assert_eq!(controller.state().tensions().tests(&structure_agency()), 2);

    let entailing = say(&mut controller, "B", "If institutions limit us, then blame shrinks.").await;
    assert!(entailing.interventions.is_empty());
    assert_eq!(controller.active_tension(), Some(&structure_agency()));

    let seventh = say(&mut controller, "A", "Structure shapes everything we see.").await;
    assert!(seventh.interventions.is_empty());

    let eighth = say(&mut controller, "B", "Agency is what people exercise daily.").await;
    assert_eq!(eighth.interventions.len(), 1);
    assert_eq!(eighth.interventions[0].kind, InterventionKind::Pivot);
    assert_ne!(controller.active_tension(), Some(&structure_agency()));
}

#[tokio::test]
async fn test_single_test_threshold_pivots_on_next_turn() {
    let mut config = EngineConfig::default();
    config.tension.test_threshold = 1;
    let mut controller = keyword_controller(config);

    let third = orbit_three(&mut controller).await;
    assert_eq!(third.interventions[0].kind, InterventionKind::ConsequenceTest);

    let fourth = say(&mut controller, "B", "Blame still lands on whoever decides.").await;
    assert_eq!(fourth.interventions.len(), 1);
    assert_eq!(fourth.interventions[0].kind, InterventionKind::Pivot);
    assert_ne!(controller.active_tension(), Some(&structure_agency()));
    assert_eq!(controller.tension_phase(&structure_agency()), TensionPhase::Active);
}

#[tokio::test]
async fn test_entailment_after_test_blocks_pivot() {
    let mut config = EngineConfig::default();
    config.tension.test_threshold = 1;
    let mut controller = keyword_controller(config);
    orbit_three(&mut controller).await;

    let fourth = say(&mut controller, "B", "If institutions limit us, then blame shrinks.").await;
    assert!(fourth.interventions.is_empty());
    assert_eq!(controller.active_tension(), Some(&structure_agency()));
}

#[tokio::test]
async fn test_committed_test_turn_stays_out_of_trackers() {
    let mut controller = keyword_controller(EngineConfig::default());
    let third = orbit_three(&mut controller).await;
    let cycles = controller.state().tensions().cycles(&structure_agency());

    let turn = controller
        .commit_intervention(&third.interventions[0], "moderator")
        .await;
    assert_eq!(turn.kind, MoveKind::ConsequenceTest);
    assert_eq!(turn.index, 4);
    assert_eq!(controller.state().tensions().cycles(&structure_agency()), cycles);
    assert_eq!(controller.state().dyads().last_speaker(), Some("A"));
}

// =============================================================================
// SYNTHESIS CADENCE
// =============================================================================

#[tokio::test]
async fn test_synthesis_every_twelve_turns() {
    let mut controller = keyword_controller(EngineConfig::default());
    let mut synthesis_turns = Vec::new();

    for (i, text) in NEUTRAL.iter().take(12).enumerate() {
        let speaker = ["A", "B", "C"][i % 3];
        let outcome = say(&mut controller, speaker, text).await;
        for intervention in &outcome.interventions {
            assert_eq!(intervention.kind, InterventionKind::Synthesis);
            synthesis_turns.push(intervention.after_turn);
        }
    }
    assert_eq!(synthesis_turns, vec![12]);
    assert_eq!(controller.state().last_synthesis_index(), 12);
}

#[tokio::test]
async fn test_synthesis_cadence_repeats() {
    let mut config = EngineConfig::default();
    config.synthesis.cadence = 3;
    let mut controller = keyword_controller(config);

    let mut synthesis_turns = Vec::new();
    for (i, text) in NEUTRAL.iter().take(7).enumerate() {
        let speaker = if i % 2 == 0 { "A" } else { "B" };
        let outcome = say(&mut controller, speaker, text).await;
        synthesis_turns.extend(
            outcome
                .interventions
                .iter()
                .filter(|i| i.kind == InterventionKind::Synthesis)
                .map(|i| i.after_turn),
        );
    }
    assert_eq!(synthesis_turns, vec![3, 6]);
}

#[tokio::test]
async fn test_committed_synthesis_moves_cadence() {
    let mut config = EngineConfig::default();
    config.synthesis.cadence = 3;
    let mut controller = keyword_controller(config);

    let mut third = None;
    for (i, text) in NEUTRAL.iter().take(3).enumerate() {
        let speaker = if i % 2 == 0 { "A" } else { "B" };
        third = Some(say(&mut controller, speaker, text).await);
    }
    let synthesis = third.unwrap().interventions[0].clone();
    let turn = controller.commit_intervention(&synthesis, "moderator").await;
    assert_eq!(turn.index, 4);
    assert_eq!(controller.state().last_synthesis_index(), 4);

    // Turns 5 and 6 are quiet, turn 7 is due
    let fifth = say(&mut controller, "B", NEUTRAL[3]).await;
    let sixth = say(&mut controller, "A", NEUTRAL[4]).await;
    let seventh = say(&mut controller, "B", NEUTRAL[5]).await;
    assert!(fifth.interventions.is_empty());
    assert!(sixth.interventions.is_empty());
    assert_eq!(seventh.interventions.len(), 1);
    assert_eq!(seventh.interventions[0].kind, InterventionKind::Synthesis);
}
