//! HTTP client for a local Whisper-style transcription service.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;

use crate::state::session::Language;

use super::{EngineError, SpeechToText};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts raw audio buffers to a sidecar transcription server and returns
/// the recognized text.
///
/// Expected contract: `POST <url>?language=<code>` with an
/// `application/octet-stream` body answers `{"text": "..."}`.
pub struct HttpTranscriber {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

impl HttpTranscriber {
    /// Build a client for the transcription service at `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl SpeechToText for HttpTranscriber {
    fn transcribe(
        &self,
        audio: Vec<u8>,
        language: Language,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let response = client
                .post(&url)
                .query(&[("language", language.code())])
                .header("content-type", "application/octet-stream")
                .body(audio)
                .send()
                .await?
                .error_for_status()?;
            let body: TranscribeResponse = response.json().await?;
            Ok(body.text)
        })
    }
}
