//! Shared types, error model, and configuration for readdo.
//!
//! This crate is the foundation depended on by all other readdo crates.
//! It provides:
//! - [`ReaddoError`], the unified error type
//! - Domain types ([`Item`], [`Intent`], [`Artifact`], [`ItemStatus`], [`Priority`])
//! - Artifact payloads ([`ExtractedContent`], [`SynthesisResult`], [`ScoreResult`], [`TodosResult`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod payloads;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ExtractorConfig, ModelConfig, ModelProvider, RetryConfig, StorageConfig,
    WorkerConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{ReaddoError, Result};
pub use payloads::{
    ContentMeta, Eta, ExtractedContent, ScoreJudgement, ScoreResult, SynthesisResult, TodoItem,
    TodoType, TodosResult, to_payload, validate_user_payload,
};
pub use types::{
    Artifact, ArtifactType, CaptureOutcome, CaptureRequest, CreatedBy, ErrorInfo, INTENT_SEPARATOR,
    Intent, Item, ItemDetail, ItemFilter, ItemStatus, Priority, StatusCounts, domain_from_url,
    format_timestamp, new_id, parse_timestamp,
};
