//! OpenAI-compatible API client.
//!
//! Provides:
//! - Chat completions in streaming mode (SSE deltas)
//! - Image generation

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Fixed instruction sent with every turn. The bracket directive is the wire
/// contract the meal extractor depends on.
pub const SYSTEM_PROMPT: &str =
    "You are a professional nutrition expert specialized in building meal plans. \
     Put every meal name in square brackets, like this: [Caesar Salad with Grilled Chicken]. \
     For each suggested meal, also provide a detailed recipe, the required ingredients, and \
     the nutrition facts (calories, protein, carbohydrates, fat).";

const CHAT_TEMPERATURE: f32 = 0.7;
const IMAGE_SIZE: &str = "1024x1024";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to model service failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model service returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("malformed stream chunk: {0}")]
    Parse(String),
    #[error("stream closed before completion")]
    Interrupted,
    #[error("no image in generation response")]
    NoImage,
}

/// Chat message for the completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub image_model: String,
}

impl OpenAiConfig {
    /// Read the client configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let chat_model =
            std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
        let image_model =
            std::env::var("OPENAI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-2".to_string());
        Ok(Self {
            api_key,
            base_url,
            chat_model,
            image_model,
        })
    }
}

/// OpenAI-compatible client shared across requests.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: Arc<OpenAiConfig>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            config: Arc::new(config),
        }
    }

    /// Start a streaming chat completion.
    ///
    /// Returns a channel of text deltas in arrival order. The channel yields
    /// a terminal `Err` on a transport error, an in-band error payload, an
    /// unparsable chunk, or a close without the `[DONE]` sentinel.
    pub async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<UnboundedReceiver<Result<String, LlmError>>, LlmError> {
        let request = ChatCompletionRequest {
            model: self.config.chat_model.clone(),
            messages,
            temperature: CHAT_TEMPERATURE,
            stream: true,
        };

        debug!(model = %request.model, "starting chat completion stream");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "model service rejected chat request");
            return Err(LlmError::Api { status, body });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_deltas(response, tx));
        Ok(rx)
    }

    /// Generate a single square image and return its hosted URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ImageGenerationRequest {
            model: self.config.image_model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: IMAGE_SIZE.to_string(),
        };

        debug!(model = %request.model, "requesting image generation");

        let response = self
            .client
            .post(format!("{}/images/generations", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "model service rejected image request");
            return Err(LlmError::Api { status, body });
        }

        let image_response: ImageGenerationResponse = response.json().await?;
        image_response
            .data
            .into_iter()
            .next()
            .map(|image| image.url)
            .ok_or(LlmError::NoImage)
    }

    pub fn http(&self) -> &Client {
        &self.client
    }
}

/// Pump SSE events into the delta channel until `[DONE]` or a failure.
async fn forward_deltas(
    response: reqwest::Response,
    tx: UnboundedSender<Result<String, LlmError>>,
) {
    let mut stream = response.bytes_stream().eventsource();

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                let _ = tx.send(Err(LlmError::Stream(e.to_string())));
                return;
            }
        };

        if event.data == DONE_SENTINEL {
            return;
        }

        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(payload) => payload,
            Err(e) => {
                let _ = tx.send(Err(LlmError::Parse(e.to_string())));
                return;
            }
        };

        if let Some(message) = api_error_message(&payload) {
            let _ = tx.send(Err(LlmError::Stream(message)));
            return;
        }

        let chunk: CompletionChunk = match serde_json::from_value(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(LlmError::Parse(e.to_string())));
                return;
            }
        };

        if let Some(delta) = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
        {
            if !delta.is_empty() && tx.send(Ok(delta)).is_err() {
                // Receiver dropped, the turn was abandoned.
                return;
            }
        }
    }

    // Upstream closed the stream without the terminating sentinel.
    let _ = tx.send(Err(LlmError::Interrupted));
}

fn api_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("unspecified streaming error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
    }

    #[test]
    fn error_payload_object_shape() {
        let payload = serde_json::json!({ "error": { "message": "quota exceeded" } });
        assert_eq!(
            api_error_message(&payload).as_deref(),
            Some("quota exceeded")
        );
    }

    #[test]
    fn error_payload_string_shape() {
        let payload = serde_json::json!({ "error": "bad things" });
        assert_eq!(api_error_message(&payload).as_deref(), Some("bad things"));
    }

    #[test]
    fn ordinary_chunk_has_no_error() {
        let payload = serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{ "delta": { "content": "hi" } }]
        });
        assert!(api_error_message(&payload).is_none());
    }

    #[test]
    fn chunk_delta_parses() {
        let chunk: CompletionChunk = serde_json::from_str(
            r#"{"object":"chat.completion.chunk","choices":[{"delta":{"content":"Try "}}]}"#,
        )
        .unwrap();
        assert_eq!(
            chunk.choices[0].delta.content.as_deref(),
            Some("Try ")
        );
    }

    #[test]
    fn keepalive_chunk_parses_to_empty_choices() {
        let chunk: CompletionChunk = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(chunk.choices.is_empty());
    }
}
