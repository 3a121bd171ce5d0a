//! Pipeline orchestration: run the processing steps for one item in order.
//!
//! The pipeline persists nothing itself. Steps write their own artifacts, and
//! the caller (the worker) decides the item's final status.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use readdo_extractor::ContentExtractor;
use readdo_shared::{
    ExtractedContent, Item, ReaddoError, Result, ScoreResult, SynthesisResult, TodosResult,
};

use crate::model::CompletionModel;
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::sinks::{ArtifactSink, ScoreSink};
use crate::steps::{ExtractStep, ScoreStep, SynthesizeStep, TodoStep};

/// State threaded through the steps of one run.
#[derive(Debug)]
pub struct StepContext {
    pub item: Item,
    pub shutdown: Shutdown,
    pub extraction: Option<ExtractedContent>,
    pub synthesis: Option<SynthesisResult>,
    pub score: Option<ScoreResult>,
    pub todos: Option<TodosResult>,
}

impl StepContext {
    pub fn new(item: Item, shutdown: Shutdown) -> Self {
        Self {
            item,
            shutdown,
            extraction: None,
            synthesis: None,
            score: None,
            todos: None,
        }
    }
}

/// One stage of processing.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut StepContext) -> Result<()>;
}

/// Runs an item through the pipeline.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, item: &Item, shutdown: &Shutdown) -> Result<()>;
}

/// Ordered list of steps.
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// The standard pipeline: extract, synthesize, score, todo.
    pub fn standard(
        extractor: Arc<dyn ContentExtractor>,
        model: Arc<dyn CompletionModel>,
        artifacts: Arc<dyn ArtifactSink>,
        scores: Arc<dyn ScoreSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self::new(vec![
            Box::new(ExtractStep::new(extractor, artifacts.clone(), retry)),
            Box::new(SynthesizeStep::new(model.clone(), artifacts.clone(), retry)),
            Box::new(ScoreStep::new(model.clone(), artifacts.clone(), scores, retry)),
            Box::new(TodoStep::new(model, artifacts, retry)),
        ])
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// A failure is returned as [`ReaddoError::Step`] naming
    /// the step. Every run starts from the first step.
    #[instrument(skip_all, fields(item_id = %item.id, url = %item.url))]
    pub async fn run(&self, item: &Item, shutdown: &Shutdown) -> Result<StepContext> {
        let mut ctx = StepContext::new(item.clone(), shutdown.clone());

        for step in &self.steps {
            let name = step.name();
            if shutdown.is_triggered() {
                return Err(ReaddoError::Cancelled.in_step(name));
            }

            debug!(step = name, "running step");
            step.run(&mut ctx).await.map_err(|e| e.in_step(name))?;
        }

        info!(
            score = ctx.score.as_ref().map(|s| s.final_score),
            priority = ctx.score.as_ref().map(|s| s.priority.as_str()),
            "pipeline complete"
        );
        Ok(ctx)
    }
}

#[async_trait]
impl Processor for Pipeline {
    async fn process(&self, item: &Item, shutdown: &Shutdown) -> Result<()> {
        self.run(item, shutdown).await.map(|_| ())
    }
}
