//! Background worker: claim CAPTURED items one at a time and process them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use readdo_shared::{ErrorInfo, Result};

use crate::pipeline::Processor;
use crate::shutdown::Shutdown;
use crate::sinks::ItemClaimer;

/// What happened to one claimed item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Processed and marked READY.
    Ready { item_id: String },
    /// Processing failed and the item was marked FAILED.
    Failed { item_id: String, error: ErrorInfo },
    /// The item was requeued by a new capture while processing; its terminal
    /// status was not written and the next claim processes it again.
    Requeued { item_id: String },
    /// Shutdown interrupted processing. The item stays PROCESSING until the
    /// next startup recovery.
    Interrupted { item_id: String },
    /// The final status write failed. The item stays PROCESSING.
    Unrecorded { item_id: String },
}

impl Outcome {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Ready { item_id }
            | Self::Failed { item_id, .. }
            | Self::Requeued { item_id }
            | Self::Interrupted { item_id }
            | Self::Unrecorded { item_id } => item_id,
        }
    }
}

/// Sequential polling worker.
pub struct Worker {
    claimer: Arc<dyn ItemClaimer>,
    processor: Arc<dyn Processor>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        claimer: Arc<dyn ItemClaimer>,
        processor: Arc<dyn Processor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            claimer,
            processor,
            poll_interval,
        }
    }

    /// Requeue items orphaned in PROCESSING by a previous run.
    ///
    /// Call once at startup, before the first claim.
    pub async fn recover(&self) -> Result<u64> {
        let reset = self.claimer.reset_stale().await?;
        if reset > 0 {
            info!(count = reset, "requeued stale items");
        }
        Ok(reset)
    }

    /// Poll and process until shutdown is requested.
    pub async fn run(&self, shutdown: Shutdown) {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "worker started");

        loop {
            if shutdown.is_triggered() {
                break;
            }

            match self.run_once(&shutdown).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => error!(error = %err, "claim failed"),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("worker stopped");
    }

    /// Claim and process at most one item.
    ///
    /// `Ok(None)` means the queue was empty. Only a failed claim is an error;
    /// processing failures are recorded on the item and reported as an
    /// [`Outcome`].
    pub async fn run_once(&self, shutdown: &Shutdown) -> Result<Option<Outcome>> {
        let Some(item) = self.claimer.claim_next().await? else {
            return Ok(None);
        };
        Ok(Some(self.process(&item, shutdown).await))
    }

    #[instrument(skip_all, fields(item_id = %item.id))]
    async fn process(&self, item: &readdo_shared::Item, shutdown: &Shutdown) -> Outcome {
        let item_id = item.id.clone();
        info!(url = %item.url, save_count = item.save_count, "processing item");

        let result = self.processor.process(item, shutdown).await;

        let (written, outcome) = match result {
            Ok(()) => (
                self.claimer.mark_ready(&item_id).await,
                Outcome::Ready {
                    item_id: item_id.clone(),
                },
            ),
            Err(err) if err.is_cancelled() => {
                warn!("processing interrupted by shutdown");
                return Outcome::Interrupted { item_id };
            }
            Err(err) => {
                error!(error = %err, "pipeline failed");
                let info = ErrorInfo::new(
                    err.step_name().unwrap_or("unknown"),
                    err.to_string(),
                    true,
                );
                (
                    self.claimer.mark_failed(&item_id, &info).await,
                    Outcome::Failed {
                        item_id: item_id.clone(),
                        error: info,
                    },
                )
            }
        };

        match written {
            Ok(true) => {
                match &outcome {
                    Outcome::Ready { .. } => info!("item is now READY"),
                    _ => info!("item is now FAILED"),
                }
                outcome
            }
            Ok(false) => {
                info!("item was requeued during processing, result discarded");
                Outcome::Requeued { item_id }
            }
            Err(err) => {
                error!(error = %err, "failed to record final status");
                Outcome::Unrecorded { item_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use readdo_extractor::StubExtractor;
    use readdo_shared::{CaptureRequest, Item, ItemFilter, ItemStatus, Priority, ReaddoError};
    use readdo_storage::Storage;
    use uuid::Uuid;

    use super::*;
    use crate::model::{CompletionModel, StubModel};
    use crate::pipeline::Pipeline;
    use crate::retry::RetryPolicy;
    use crate::shutdown;

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("readdo_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn stub_worker(storage: &Arc<Storage>, model: Arc<dyn CompletionModel>) -> Worker {
        let pipeline = Pipeline::standard(
            Arc::new(StubExtractor),
            model,
            storage.clone(),
            storage.clone(),
            RetryPolicy::none(),
        );
        Worker::new(
            storage.clone(),
            Arc::new(pipeline),
            Duration::from_millis(10),
        )
    }

    async fn capture(storage: &Storage, url: &str) -> Item {
        storage
            .capture(&CaptureRequest::new(url, "learn"))
            .await
            .unwrap()
            .item
    }

    /// Returns malformed JSON for every prompt.
    struct GarbageModel;

    #[async_trait]
    impl CompletionModel for GarbageModel {
        fn model_id(&self) -> &str {
            "garbage"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok("not json".into())
        }
    }

    /// Re-captures the item's URL mid-processing, then succeeds.
    struct RecapturingProcessor {
        storage: Arc<Storage>,
    }

    #[async_trait]
    impl Processor for RecapturingProcessor {
        async fn process(&self, item: &Item, _shutdown: &Shutdown) -> Result<()> {
            self.storage
                .capture(&CaptureRequest::new(item.url.as_str(), "again"))
                .await?;
            Ok(())
        }
    }

    /// Waits for shutdown, then reports cancellation.
    struct BlockingProcessor {
        started: AtomicU32,
    }

    #[async_trait]
    impl Processor for BlockingProcessor {
        async fn process(&self, _item: &Item, shutdown: &Shutdown) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            shutdown.cancelled().await;
            Err(ReaddoError::Cancelled.in_step("extract"))
        }
    }

    #[tokio::test]
    async fn empty_queue_yields_nothing() {
        let storage = test_storage().await;
        let worker = stub_worker(&storage, Arc::new(StubModel::new()));
        assert_eq!(worker.run_once(&Shutdown::never()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn successful_item_becomes_ready() {
        let storage = test_storage().await;
        let item = capture(&storage, "https://example.com/ok").await;
        let worker = stub_worker(&storage, Arc::new(StubModel::new()));

        let outcome = worker.run_once(&Shutdown::never()).await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::Ready {
                item_id: item.id.clone()
            }
        );

        let stored = storage.get_item(&item.id).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Ready);
        assert_eq!(stored.priority, Some(Priority::PlanIt));
        assert!(stored.error_info.is_none());
        assert_eq!(storage.list_artifacts(&item.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn failing_item_records_error_info() {
        let storage = test_storage().await;
        let item = capture(&storage, "https://example.com/bad").await;
        let worker = stub_worker(&storage, Arc::new(GarbageModel));

        let outcome = worker.run_once(&Shutdown::never()).await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Failed { .. }));

        let stored = storage.get_item(&item.id).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Failed);
        let info = stored.error_info.unwrap();
        assert_eq!(info.failed_step, "synthesize");
        assert!(info.retryable);
        assert!(info.message.contains("synthesize"));

        // Only the extraction survived the short-circuit.
        assert_eq!(storage.list_artifacts(&item.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_during_processing_is_kept() {
        let storage = test_storage().await;
        let item = capture(&storage, "https://example.com/twice").await;
        let worker = Worker::new(
            storage.clone(),
            Arc::new(RecapturingProcessor {
                storage: storage.clone(),
            }),
            Duration::from_millis(10),
        );

        let outcome = worker.run_once(&Shutdown::never()).await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::Requeued {
                item_id: item.id.clone()
            }
        );

        let stored = storage.get_item(&item.id).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Captured);
        assert_eq!(stored.save_count, 2);
    }

    #[tokio::test]
    async fn recover_requeues_stale_items() {
        let storage = test_storage().await;
        let item = capture(&storage, "https://example.com/stale").await;
        storage.claim_next_captured().await.unwrap().unwrap();

        let worker = stub_worker(&storage, Arc::new(StubModel::new()));
        assert_eq!(worker.recover().await.unwrap(), 1);
        assert_eq!(
            storage.get_item(&item.id).await.unwrap().status,
            ItemStatus::Captured
        );
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_on_shutdown() {
        let storage = test_storage().await;
        let a = capture(&storage, "https://example.com/a").await;
        let b = capture(&storage, "https://example.com/b").await;
        let worker = Arc::new(stub_worker(&storage, Arc::new(StubModel::new())));

        let (trigger, signal) = shutdown::channel();
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(signal).await }
        });

        let ready_filter = ItemFilter {
            statuses: vec![ItemStatus::Ready],
            ..Default::default()
        };
        for _ in 0..200 {
            if storage.list_items(&ready_filter).await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stopped")
            .unwrap();

        for id in [&a.id, &b.id] {
            assert_eq!(storage.get_item(id).await.unwrap().status, ItemStatus::Ready);
        }
    }

    #[tokio::test]
    async fn shutdown_leaves_item_for_recovery() {
        let storage = test_storage().await;
        let item = capture(&storage, "https://example.com/slow").await;
        let processor = Arc::new(BlockingProcessor {
            started: AtomicU32::new(0),
        });
        let worker = Worker::new(storage.clone(), processor.clone(), Duration::from_millis(10));

        let (trigger, signal) = shutdown::channel();
        let run = tokio::spawn(async move { worker.run_once(&signal).await });

        while processor.started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.trigger();

        let outcome = run.await.unwrap().unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::Interrupted {
                item_id: item.id.clone()
            }
        );
        assert_eq!(
            storage.get_item(&item.id).await.unwrap().status,
            ItemStatus::Processing
        );
    }
}
