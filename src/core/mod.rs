//! Core modules for Volley

pub mod embedding;
pub mod generator;
pub mod topic_extractor;
pub mod entailment;
pub mod redundancy;
pub mod dyad;
pub mod tension;
pub mod conversation;
pub mod controller;
pub mod snapshot;
pub mod api;

pub use embedding::{Embedder, NullEmbedder, HashingEmbedder, cosine, lexical_similarity};
pub use generator::{TurnGenerator, ScriptedGenerator};
pub use topic_extractor::TopicExtractor;
pub use entailment::EntailmentDetector;
pub use redundancy::RedundancyChecker;
pub use dyad::{DyadTracker, DyadState};
pub use tension::{TensionTracker, TensionState};
pub use conversation::ConversationState;
pub use controller::ProgressionController;
pub use snapshot::{save_snapshot, load_snapshot, load_and_validate_snapshot, validate_snapshot, history_digest};
pub use api::{create_router, run_server};
