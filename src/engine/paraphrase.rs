//! Paraphrasing collaborator backed by the Anthropic Messages API.
//!
//! The model is the hidden layer of the piece: it receives the speaker's
//! real words plus the recent turn history and returns a slightly wrong,
//! perfectly natural version that nudges the two sides of the conversation
//! apart. How hard it pushes is the configured drift strength.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::CollaboratorConfig;

use super::{EngineError, Paraphraser, ParaphraseRequest};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How many recent turns accompany each request.
const HISTORY_WINDOW: usize = 8;

/// Messages API client producing the drift.
pub struct AnthropicParaphraser {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    strength: f32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicParaphraser {
    /// Build a client from the collaborator configuration.
    pub fn new(api_key: String, config: &CollaboratorConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            model: config.paraphrase_model.clone(),
            max_tokens: config.paraphrase_max_tokens,
            strength: config.drift_strength,
        })
    }

    fn system_prompt(&self, request: &ParaphraseRequest) -> String {
        let mut prompt = format!(
            "You relay lines between two people who cannot hear each other. \
             Rewrite the speaker's message so it still sounds perfectly \
             natural but swaps key nouns, places, and details, steering the \
             two sides of the conversation slowly apart. Preserve sentence \
             structure, length, and tone. Never acknowledge the change. \
             Answer in the same language as the message ({language}). \
             Drift strength (0.0 faithful, 1.0 aggressive): {strength:.2}. \
             Output only the altered message.",
            language = request.language.code(),
            strength = self.strength,
        );
        if let Some(topic) = &request.topic {
            prompt.push_str(&format!("\n\nThe original conversation topic is: \"{topic}\""));
        }
        if !request.history.is_empty() {
            let lines: Vec<String> = request
                .history
                .iter()
                .rev()
                .take(HISTORY_WINDOW)
                .rev()
                .map(|turn| {
                    format!(
                        "[Player {}] said: {} / heard as: {}",
                        turn.player, turn.original, turn.misheard
                    )
                })
                .collect();
            prompt.push_str("\n\nConversation so far, keep building on the existing drift:\n");
            prompt.push_str(&lines.join("\n"));
        }
        prompt
    }
}

impl Paraphraser for AnthropicParaphraser {
    fn paraphrase(
        &self,
        request: ParaphraseRequest,
    ) -> BoxFuture<'static, Result<String, EngineError>> {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            // hotter with stronger drift, same curve the installation was tuned with
            temperature: (0.7 + self.strength * 0.5).min(1.0),
            system: self.system_prompt(&request),
            messages: vec![ChatMessage {
                role: "user",
                content: format!(
                    "Player {} says:\n\n{}",
                    request.speaker, request.original
                ),
            }],
        };
        let body = serde_json::to_value(&body);
        Box::pin(async move {
            let body = body.map_err(|err| EngineError::BadResponse(err.to_string()))?;
            let response = client
                .post(API_URL)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let parsed: MessagesResponse = response.json().await?;
            let text = parsed
                .content
                .into_iter()
                .find_map(|block| block.text)
                .map(|text| text.trim().to_owned())
                .unwrap_or_default();
            if text.is_empty() {
                return Err(EngineError::BadResponse("empty completion".into()));
            }
            Ok(text)
        })
    }
}
