//! Core types for the progression engine

mod state;
mod signals;
mod output;
mod reason;
mod turn;
mod pair;
mod snapshot;

pub use state::{CandidateState, TensionPhase};
pub use signals::{EntailmentTag, EntailmentReport, RedundancyVerdict, SimilarityMethod};
pub use output::{Intervention, InterventionKind, AttemptRecord, RefinementReport, TurnOutcome};
pub use reason::ReasonCode;
pub use turn::{Turn, MoveKind, History, SpeakerId, TopicLabel};
pub use pair::{DyadKey, TensionPair};
pub use snapshot::{SessionSnapshot, TurnRecord, DyadRecord, TensionRecord, SNAPSHOT_VERSION};
