//! Boundary to the external collaborators: speech-to-text and the
//! paraphrasing service that produces the drift.
//!
//! Both collaborators are object-safe traits behind `Arc<dyn …>` so the
//! session host can swap HTTP clients for scripted mocks in tests. Every
//! failure they surface is recovered inside the turn pipeline; nothing
//! here may take the session down.

pub mod mock;
pub mod paraphrase;
pub mod transcribe;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::session::{Language, Turn};

/// Errors surfaced by collaborator calls.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The HTTP request itself failed (connect, status, body).
    #[error("collaborator request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The collaborator answered with something unusable.
    #[error("collaborator returned an unusable response: {0}")]
    BadResponse(String),
}

/// Context handed to the paraphrasing collaborator for one utterance.
#[derive(Debug, Clone)]
pub struct ParaphraseRequest {
    /// What the speaker actually said.
    pub original: String,
    /// Most recent turns, oldest first, so the drift stays coherent.
    pub history: Vec<Turn>,
    /// Topic of the round, when one is selected.
    pub topic: Option<String>,
    /// Speaking player, 1 or 2.
    pub speaker: u8,
    /// Session language.
    pub language: Language,
}

/// Speech-to-text collaborator.
///
/// Failure is treated as "no speech detected" by the pipeline.
pub trait SpeechToText: Send + Sync {
    /// Convert a raw audio buffer into text in the given language.
    fn transcribe(
        &self,
        audio: Vec<u8>,
        language: Language,
    ) -> BoxFuture<'static, Result<String, EngineError>>;
}

/// Paraphrasing collaborator producing the altered line.
///
/// Failure makes the pipeline fall back to the original text.
pub trait Paraphraser: Send + Sync {
    /// Produce a single natural-language altered version of the utterance.
    fn paraphrase(
        &self,
        request: ParaphraseRequest,
    ) -> BoxFuture<'static, Result<String, EngineError>>;
}
