//! Processing engine for readdo.
//!
//! Ties content extraction, text completion and storage together into the
//! per-item pipeline (extract, synthesize, score, todo) and the
//! background worker that drives it.

pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod shutdown;
pub mod sinks;
pub mod steps;
pub mod worker;

pub use model::{
    AnthropicClient, CompletionModel, GeminiClient, OpenAiCompatibleClient, StubModel, build_model,
};
pub use pipeline::{Pipeline, Processor, Step, StepContext};
pub use retry::RetryPolicy;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use sinks::{ArtifactSink, ItemClaimer, ScoreSink};
pub use worker::{Outcome, Worker};
