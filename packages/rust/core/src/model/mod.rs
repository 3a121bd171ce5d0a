//! Text completion backends.
//!
//! Every backend takes a single prompt and returns the model's raw text.
//! Parsing that text into typed payloads happens in the pipeline steps.

mod anthropic;
mod gemini;
mod openai;
mod stub;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{info, warn};

use readdo_shared::{ModelConfig, ModelProvider, ReaddoError, Result};

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;
pub use stub::StubModel;

/// System instruction shared by the HTTP backends.
pub(crate) const SYSTEM_PROMPT: &str =
    "You are a reading assistant. Reply with a single JSON document and nothing else.";

/// Longest error body echoed back in an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// A model that completes a prompt.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Model identifier used in logs.
    fn model_id(&self) -> &str;

    /// Return the model's reply to `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the backend selected by `[model] provider`.
///
/// Falls back to [`StubModel`] when the provider needs an API key that is
/// not set, so the pipeline still runs end to end without credentials.
pub fn build_model(config: &ModelConfig) -> Result<Box<dyn CompletionModel>> {
    if config.provider == ModelProvider::Stub {
        info!("using stub completion model");
        return Ok(Box::new(StubModel::new()));
    }

    let api_key = match config.api_key() {
        Ok(key) => key,
        Err(err) => {
            warn!(provider = ?config.provider, error = %err, "falling back to stub completion model");
            return Ok(Box::new(StubModel::new()));
        }
    };

    let model: Box<dyn CompletionModel> = match config.provider {
        ModelProvider::Anthropic => {
            let key = api_key.ok_or_else(|| ReaddoError::config("anthropic requires an API key"))?;
            Box::new(AnthropicClient::new(config, key)?)
        }
        ModelProvider::Gemini => {
            let key = api_key.ok_or_else(|| ReaddoError::config("gemini requires an API key"))?;
            Box::new(GeminiClient::new(config, key)?)
        }
        _ => Box::new(OpenAiCompatibleClient::new(config, api_key)?),
    };

    info!(provider = ?config.provider, model = model.model_id(), "completion model ready");
    Ok(model)
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ReaddoError::config(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success response to an [`ReaddoError::Upstream`] carrying its status.
pub(crate) async fn check_status(response: Response, backend: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    Err(ReaddoError::http_status(
        status.as_u16(),
        format!("{backend} returned {status}: {}", body.trim()),
    ))
}

pub(crate) fn transport_error(backend: &str, err: reqwest::Error) -> ReaddoError {
    ReaddoError::transport(format!("{backend} request failed: {err}"))
}
