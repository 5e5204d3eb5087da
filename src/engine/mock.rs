//! Scripted collaborators for tests and offline rehearsal runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use crate::state::session::Language;

use super::{EngineError, Paraphraser, ParaphraseRequest, SpeechToText};

/// Returns queued transcripts in order; an empty queue transcribes as
/// silence.
#[derive(Default)]
pub struct ScriptedTranscriber {
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedTranscriber {
    /// Queue up the transcripts to return, in order.
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            queue: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }
}

impl SpeechToText for ScriptedTranscriber {
    fn transcribe(
        &self,
        _audio: Vec<u8>,
        _language: Language,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        let next = self
            .queue
            .lock()
            .expect("scripted transcript queue poisoned")
            .pop_front()
            .unwrap_or_default();
        Box::pin(async move { Ok(next) })
    }
}

/// A transcriber whose every call fails, for collaborator-fault tests.
pub struct FailingTranscriber;

impl SpeechToText for FailingTranscriber {
    fn transcribe(
        &self,
        _audio: Vec<u8>,
        _language: Language,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        Box::pin(async { Err(EngineError::BadResponse("transcriber offline".into())) })
    }
}

/// Replies with a fixed line (or echoes the original when none is set) and
/// records every request it receives.
#[derive(Default)]
pub struct CannedParaphraser {
    reply: Option<String>,
    calls: Mutex<Vec<ParaphraseRequest>>,
}

impl CannedParaphraser {
    /// Always reply with `line`.
    pub fn replying(line: impl Into<String>) -> Self {
        Self {
            reply: Some(line.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<ParaphraseRequest> {
        self.calls
            .lock()
            .expect("paraphrase call log poisoned")
            .clone()
    }
}

impl Paraphraser for CannedParaphraser {
    fn paraphrase(
        &self,
        request: ParaphraseRequest,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        let reply = self
            .reply
            .clone()
            .unwrap_or_else(|| request.original.clone());
        self.calls
            .lock()
            .expect("paraphrase call log poisoned")
            .push(request);
        Box::pin(async move { Ok(reply) })
    }
}

/// A paraphraser whose every call fails, for fallback tests.
pub struct FailingParaphraser;

impl Paraphraser for FailingParaphraser {
    fn paraphrase(
        &self,
        _request: ParaphraseRequest,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        Box::pin(async { Err(EngineError::BadResponse("paraphraser offline".into())) })
    }
}
