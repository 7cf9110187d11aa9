//! Text generator port
//!
//! The engine only assumes an asynchronous text-in/text-out contract with an
//! optional revision hint; model, prompt and transport live outside.

use std::collections::VecDeque;
use async_trait::async_trait;

use crate::error::GeneratorError;

/// Source of candidate turns for one speaker
#[async_trait]
pub trait TurnGenerator: Send {
    /// Produce a draft. `revision` is `None` for the first draft of a turn.
    async fn generate(&mut self, revision: Option<&str>) -> Result<String, GeneratorError>;
}

/// Replays a fixed list of drafts
///
/// The first call returns the first draft; every revision request pops the
/// next one. Once the queue is empty the last draft is repeated.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    drafts: VecDeque<String>,
    last: Option<String>,
    requests: Vec<Option<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(drafts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            drafts: drafts.into_iter().map(Into::into).collect(),
            last: None,
            requests: Vec::new(),
        }
    }

    /// Single draft, repeated on every revision
    pub fn single(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::new([text])
    }

    /// Revision instructions received so far (`None` = initial draft)
    pub fn requests(&self) -> &[Option<String>] {
        &self.requests
    }

    pub fn calls(&self) -> usize {
        self.requests.len()
    }
}

#[async_trait]
impl TurnGenerator for ScriptedGenerator {
    async fn generate(&mut self, revision: Option<&str>) -> Result<String, GeneratorError> {
        self.requests.push(revision.map(str::to_string));
        if let Some(next) = self.drafts.pop_front() {
            self.last = Some(next.clone());
            return Ok(next);
        }
        self.last.clone().ok_or(GeneratorError::Exhausted)
    }
}
