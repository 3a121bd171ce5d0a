//! Storage seams used by the pipeline and worker.
//!
//! The pipeline only ever writes artifacts and scores; the worker only claims
//! and finishes items. Both are implemented for [`Storage`].

use async_trait::async_trait;

use readdo_shared::{Artifact, ErrorInfo, Item, Priority, Result};
use readdo_storage::Storage;

/// Persists step outputs, replacing any previous artifact of the same type.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn upsert_artifact(&self, artifact: &Artifact) -> Result<()>;
}

/// Records the final score and priority on the item.
#[async_trait]
pub trait ScoreSink: Send + Sync {
    async fn update_score_and_priority(
        &self,
        item_id: &str,
        score: f64,
        priority: Priority,
    ) -> Result<()>;
}

/// Queue operations the worker needs.
#[async_trait]
pub trait ItemClaimer: Send + Sync {
    async fn claim_next(&self) -> Result<Option<Item>>;

    /// `Ok(false)` when the item left PROCESSING before the write.
    async fn mark_ready(&self, item_id: &str) -> Result<bool>;

    async fn mark_failed(&self, item_id: &str, error: &ErrorInfo) -> Result<bool>;

    async fn reset_stale(&self) -> Result<u64>;
}

#[async_trait]
impl ArtifactSink for Storage {
    async fn upsert_artifact(&self, artifact: &Artifact) -> Result<()> {
        Storage::upsert_artifact(self, artifact).await
    }
}

#[async_trait]
impl ScoreSink for Storage {
    async fn update_score_and_priority(
        &self,
        item_id: &str,
        score: f64,
        priority: Priority,
    ) -> Result<()> {
        Storage::update_score_and_priority(self, item_id, score, priority).await
    }
}

#[async_trait]
impl ItemClaimer for Storage {
    async fn claim_next(&self) -> Result<Option<Item>> {
        self.claim_next_captured().await
    }

    async fn mark_ready(&self, item_id: &str) -> Result<bool> {
        Storage::mark_ready(self, item_id).await
    }

    async fn mark_failed(&self, item_id: &str, error: &ErrorInfo) -> Result<bool> {
        Storage::mark_failed(self, item_id, error).await
    }

    async fn reset_stale(&self) -> Result<u64> {
        self.reset_stale_processing().await
    }
}
