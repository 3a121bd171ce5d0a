//! Canned completions for development without an API key.

use async_trait::async_trait;
use serde_json::json;

use readdo_shared::{ReaddoError, Result};

use super::CompletionModel;
use crate::prompts::PromptTask;

/// Answers each pipeline prompt with a fixed, valid reply.
#[derive(Debug, Clone, Default)]
pub struct StubModel;

impl StubModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionModel for StubModel {
    fn model_id(&self) -> &str {
        "stub"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let reply = match PromptTask::of_prompt(prompt) {
            Some(PromptTask::Synthesize) => json!({
                "points": [
                    "The article lays out the core idea and the trade-offs behind it.",
                    "It walks through a worked example step by step.",
                    "It lists the mistakes people make when applying the idea first.",
                ],
                "insight": "Applying the idea to one small real task is the fastest way to learn it.",
            }),
            Some(PromptTask::Score) => json!({
                "intent_score": 70,
                "quality_score": 65,
                "reasons": [
                    "Covers the topic named in the intent.",
                    "Includes a concrete worked example.",
                    "Short enough to finish in one sitting.",
                ],
            }),
            Some(PromptTask::Todos) => json!({
                "todos": [
                    {"title": "Read the worked example", "eta": "20m", "type": "READ"},
                    {"title": "Write down the three key points", "eta": "10m", "type": "WRITE"},
                    {"title": "Build a small prototype using the idea", "eta": "1h", "type": "BUILD"},
                ],
            }),
            None => {
                return Err(ReaddoError::parse(
                    "stub model received a prompt without a task line",
                ));
            }
        };
        Ok(reply.to_string())
    }
}
