//! Error taxonomy
//!
//! Detector degradation never surfaces here; it is absorbed inside the
//! detectors. Quality-gate exhaustion is not an error either: the best draft
//! is accepted and flagged.

use thiserror::Error;

/// Failures of the external text generator
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator transport error: {0}")]
    Transport(String),

    #[error("Generator has no draft to offer")]
    Exhausted,
}

/// Failures of the embedding backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbedError {
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {tag} pattern {pattern:?}: {source}")]
    InvalidPattern {
        tag: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Snapshot persistence failures
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Cannot serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Snapshot storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Snapshot digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("Snapshot has no history")]
    Empty,

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// Session-level failures of `propose_and_commit`
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("Session deadline elapsed before the generator produced a draft")]
    GeneratorTimeout,
}

pub type EngineResult<T> = Result<T, EngineError>;
