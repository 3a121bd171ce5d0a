//! Google Gemini `generateContent` backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use readdo_shared::{ModelConfig, ReaddoError, Result};

use super::{CompletionModel, SYSTEM_PROMPT, check_status, http_client, transport_error};

const BACKEND: &str = "gemini";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Client for `POST {base}/models/{model}:generateContent`.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        let model = config.model_name();
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/models/{model}:generateContent", config.base_url()),
            api_key,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(BACKEND, e))?;
        let response = check_status(response, BACKEND).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ReaddoError::parse(format!("invalid {BACKEND} response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(ReaddoError::http_status(
                err.code,
                format!("{BACKEND} returned an error: {}", err.message),
            ));
        }

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ReaddoError::parse(format!("{BACKEND} response has no text")));
        }

        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use readdo_shared::ModelProvider;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config_for(server: &MockServer) -> ModelConfig {
        ModelConfig {
            provider: ModelProvider::Gemini,
            base_url: Some(server.uri()),
            max_tokens: 256,
            timeout_secs: 5,
            ..ModelConfig::default()
        }
    }

    #[tokio::test]
    async fn sends_generate_content_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "g-test"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {"maxOutputTokens": 256}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [
                    {"content": {"role": "model", "parts": [{"text": "{\"ok\":"}, {"text": "true}"}]}},
                    {"content": {"role": "model", "parts": [{"text": "ignored"}]}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config_for(&server), "g-test".into()).unwrap();
        assert_eq!(client.complete("hello").await.unwrap(), "{\"ok\":true}");
        assert_eq!(client.model_id(), "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config_for(&server), "k".into()).unwrap();
        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, ReaddoError::Upstream { status: Some(429), .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_key_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config_for(&server), "bad".into()).unwrap();
        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, ReaddoError::Upstream { status: Some(403), .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_candidates_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})),
            )
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config_for(&server), "k".into()).unwrap();
        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, ReaddoError::Parse { .. }));
    }
}
