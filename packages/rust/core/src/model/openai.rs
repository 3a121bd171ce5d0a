//! OpenAI-compatible chat completions (OpenAI, OpenRouter, Ollama).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use readdo_shared::{ModelConfig, ReaddoError, Result};

use super::{CompletionModel, SYSTEM_PROMPT, check_status, http_client, transport_error};

const BACKEND: &str = "chat completions";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any `POST {base}/chat/completions` endpoint.
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiCompatibleClient {
    /// `api_key` is sent as a bearer token when present.
    pub fn new(config: &ModelConfig, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/chat/completions", config.base_url()),
            api_key,
            model: config.model_name(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompatibleClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(BACKEND, e))?;
        let response = check_status(response, BACKEND).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReaddoError::parse(format!("invalid {BACKEND} response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ReaddoError::parse(format!("{BACKEND} response has no content")))?;

        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}
