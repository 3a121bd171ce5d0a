//! The four processing steps: extract, synthesize, score, todo.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use readdo_extractor::ContentExtractor;
use readdo_shared::{
    Artifact, ArtifactType, CreatedBy, ReaddoError, Result, ScoreJudgement, ScoreResult,
    SynthesisResult, TodosResult, to_payload,
};

use crate::model::CompletionModel;
use crate::pipeline::{Step, StepContext};
use crate::prompts;
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use crate::sinks::{ArtifactSink, ScoreSink};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn save_artifact<T: serde::Serialize>(
    sink: &dyn ArtifactSink,
    ctx: &StepContext,
    artifact_type: ArtifactType,
    value: &T,
) -> Result<()> {
    let artifact = Artifact::new(
        ctx.item.id.as_str(),
        artifact_type,
        to_payload(value)?,
        CreatedBy::System,
    );
    sink.upsert_artifact(&artifact).await
}

fn missing(step: &str, what: &str) -> ReaddoError {
    ReaddoError::validation(format!("{step} step requires {what} from an earlier step"))
}

/// Ask the model and parse its reply as JSON.
async fn complete_json<T: DeserializeOwned>(
    model: &dyn CompletionModel,
    retry: &RetryPolicy,
    shutdown: &Shutdown,
    operation: &str,
    prompt: &str,
) -> Result<T> {
    let raw = retry
        .run(operation, shutdown, || model.complete(prompt))
        .await?;
    debug!(operation, model = model.model_id(), chars = raw.len(), "model replied");
    parse_json_reply(&raw)
}

/// Parse a model reply, tolerating Markdown code fences and surrounding prose.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let body = strip_code_fences(raw);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let braced = body
                .find('{')
                .zip(body.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &body[start..=end]);
            match braced.map(serde_json::from_str::<T>) {
                Some(Ok(value)) => Ok(value),
                _ => Err(ReaddoError::parse(format!(
                    "model reply is not the expected JSON: {first_err}"
                ))),
            }
        }
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Step 1: Extract
// ---------------------------------------------------------------------------

/// Fetches the page and stores the `extraction` artifact.
pub struct ExtractStep {
    extractor: Arc<dyn ContentExtractor>,
    artifacts: Arc<dyn ArtifactSink>,
    retry: RetryPolicy,
}

impl ExtractStep {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        artifacts: Arc<dyn ArtifactSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            extractor,
            artifacts,
            retry,
        }
    }
}

#[async_trait]
impl Step for ExtractStep {
    fn name(&self) -> &str {
        "extract"
    }

    #[instrument(skip_all, fields(extractor = self.extractor.name()))]
    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let url = ctx.item.url.clone();
        let content = self
            .retry
            .run("extract", &ctx.shutdown, || self.extractor.extract(&url))
            .await?;

        save_artifact(self.artifacts.as_ref(), ctx, ArtifactType::Extraction, &content).await?;
        ctx.extraction = Some(content);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Step 2: Synthesize
// ---------------------------------------------------------------------------

/// Distills the text into three points and an insight.
pub struct SynthesizeStep {
    model: Arc<dyn CompletionModel>,
    artifacts: Arc<dyn ArtifactSink>,
    retry: RetryPolicy,
}

impl SynthesizeStep {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        artifacts: Arc<dyn ArtifactSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            artifacts,
            retry,
        }
    }
}

#[async_trait]
impl Step for SynthesizeStep {
    fn name(&self) -> &str {
        "synthesize"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let extraction = ctx
            .extraction
            .as_ref()
            .ok_or_else(|| missing("synthesize", "extracted content"))?;

        let prompt = prompts::synthesize_prompt(&ctx.item.intent_text, &extraction.normalized_text);
        let synthesis: SynthesisResult = complete_json(
            self.model.as_ref(),
            &self.retry,
            &ctx.shutdown,
            "synthesize",
            &prompt,
        )
        .await?;
        let synthesis = synthesis.normalize()?;

        save_artifact(self.artifacts.as_ref(), ctx, ArtifactType::Synthesis, &synthesis).await?;
        ctx.synthesis = Some(synthesis);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Step 3: Score
// ---------------------------------------------------------------------------

/// Judges relevance, applies the repeat-interest boost and sets the priority.
pub struct ScoreStep {
    model: Arc<dyn CompletionModel>,
    artifacts: Arc<dyn ArtifactSink>,
    scores: Arc<dyn ScoreSink>,
    retry: RetryPolicy,
}

impl ScoreStep {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        artifacts: Arc<dyn ArtifactSink>,
        scores: Arc<dyn ScoreSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            artifacts,
            scores,
            retry,
        }
    }
}

#[async_trait]
impl Step for ScoreStep {
    fn name(&self) -> &str {
        "score"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let synthesis = ctx
            .synthesis
            .as_ref()
            .ok_or_else(|| missing("score", "a synthesis"))?;
        let extraction = ctx
            .extraction
            .as_ref()
            .ok_or_else(|| missing("score", "extracted content"))?;

        let prompt = prompts::score_prompt(
            &ctx.item.intent_text,
            synthesis,
            &extraction.content_meta,
            ctx.item.save_count,
        )?;
        let judgement: ScoreJudgement = complete_json(
            self.model.as_ref(),
            &self.retry,
            &ctx.shutdown,
            "score",
            &prompt,
        )
        .await?;

        let score = ScoreResult::compute(judgement, ctx.item.save_count);
        debug!(
            final_score = score.final_score,
            priority = score.priority.as_str(),
            boost = score.save_count_boost,
            "scored item"
        );

        save_artifact(self.artifacts.as_ref(), ctx, ArtifactType::Score, &score).await?;
        self.scores
            .update_score_and_priority(&ctx.item.id, score.final_score, score.priority)
            .await?;
        ctx.score = Some(score);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Step 4: Todo
// ---------------------------------------------------------------------------

/// Plans follow-up actions.
pub struct TodoStep {
    model: Arc<dyn CompletionModel>,
    artifacts: Arc<dyn ArtifactSink>,
    retry: RetryPolicy,
}

impl TodoStep {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        artifacts: Arc<dyn ArtifactSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            artifacts,
            retry,
        }
    }
}

#[async_trait]
impl Step for TodoStep {
    fn name(&self) -> &str {
        "todo"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let synthesis = ctx
            .synthesis
            .as_ref()
            .ok_or_else(|| missing("todo", "a synthesis"))?;
        let score = ctx
            .score
            .as_ref()
            .ok_or_else(|| missing("todo", "a score"))?;

        let prompt = prompts::todos_prompt(&ctx.item.intent_text, synthesis, score.priority)?;
        let todos: TodosResult = complete_json(
            self.model.as_ref(),
            &self.retry,
            &ctx.shutdown,
            "todo",
            &prompt,
        )
        .await?;
        todos.validate()?;

        save_artifact(self.artifacts.as_ref(), ctx, ArtifactType::Todos, &todos).await?;
        ctx.todos = Some(todos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use readdo_extractor::StubExtractor;
    use readdo_shared::{CaptureRequest, Item, Priority};

    use super::*;
    use crate::model::StubModel;

    /// Records everything written to it.
    #[derive(Default)]
    struct RecordingSink {
        artifacts: Mutex<Vec<Artifact>>,
        scores: Mutex<Vec<(String, f64, Priority)>>,
    }

    #[async_trait]
    impl ArtifactSink for RecordingSink {
        async fn upsert_artifact(&self, artifact: &Artifact) -> Result<()> {
            self.artifacts.lock().unwrap().push(artifact.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl ScoreSink for RecordingSink {
        async fn update_score_and_priority(
            &self,
            item_id: &str,
            score: f64,
            priority: Priority,
        ) -> Result<()> {
            self.scores
                .lock()
                .unwrap()
                .push((item_id.to_string(), score, priority));
            Ok(())
        }
    }

    /// Replies with a fixed string regardless of the prompt.
    struct FixedModel(&'static str);

    #[async_trait]
    impl CompletionModel for FixedModel {
        fn model_id(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn context(save_count: u32) -> StepContext {
        let mut item = Item::from_capture(&CaptureRequest::new("https://example.com/a", "learn"));
        item.save_count = save_count;
        StepContext::new(item, Shutdown::never())
    }

    async fn extracted_context(save_count: u32) -> StepContext {
        let mut ctx = context(save_count);
        ctx.extraction = Some(StubExtractor.extract("https://example.com/a").await.unwrap());
        ctx
    }

    #[test]
    fn strips_fences_and_prose() {
        let fenced = "```json\n{\"intent_score\": 50, \"quality_score\": 40}\n```";
        let judged: ScoreJudgement = parse_json_reply(fenced).unwrap();
        assert_eq!(judged.intent_score, 50.0);

        let chatty = "Sure! Here it is: {\"intent_score\": 1, \"quality_score\": 2} Hope that helps.";
        let judged: ScoreJudgement = parse_json_reply(chatty).unwrap();
        assert_eq!(judged.quality_score, 2.0);

        let bare = "```{\"intent_score\": 3, \"quality_score\": 4}```";
        let judged: ScoreJudgement = parse_json_reply(bare).unwrap();
        assert_eq!(judged.intent_score, 3.0);

        let err = parse_json_reply::<ScoreJudgement>("no json here").unwrap_err();
        assert!(matches!(err, ReaddoError::Parse { .. }));
    }

    #[tokio::test]
    async fn extract_stores_artifact() {
        let sink = Arc::new(RecordingSink::default());
        let step = ExtractStep::new(Arc::new(StubExtractor), sink.clone(), RetryPolicy::none());
        let mut ctx = context(1);

        step.run(&mut ctx).await.unwrap();

        let artifacts = sink.artifacts.lock().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].artifact_type, ArtifactType::Extraction);
        assert_eq!(artifacts[0].created_by, CreatedBy::System);
        assert!(ctx.extraction.is_some());
    }

    #[tokio::test]
    async fn synthesize_truncates_extra_points() {
        let sink = Arc::new(RecordingSink::default());
        let model = FixedModel(r#"{"points": ["a", "b", " ", "c", "d"], "insight": "i"}"#);
        let step = SynthesizeStep::new(Arc::new(model), sink.clone(), RetryPolicy::none());
        let mut ctx = extracted_context(1).await;

        step.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.synthesis.unwrap().points, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn synthesize_rejects_too_few_points() {
        let sink = Arc::new(RecordingSink::default());
        let model = FixedModel(r#"{"points": ["a", "b"], "insight": "i"}"#);
        let step = SynthesizeStep::new(Arc::new(model), sink.clone(), RetryPolicy::none());
        let mut ctx = extracted_context(1).await;

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReaddoError::Parse { .. }));
        assert!(sink.artifacts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn synthesize_without_extraction_fails() {
        let sink = Arc::new(RecordingSink::default());
        let step = SynthesizeStep::new(Arc::new(StubModel::new()), sink, RetryPolicy::none());
        let err = step.run(&mut context(1)).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn score_applies_save_count_boost() {
        let sink = Arc::new(RecordingSink::default());
        let model = FixedModel(r#"{"intent_score": 70, "quality_score": 50, "reasons": ["r"]}"#);
        let step = ScoreStep::new(
            Arc::new(model),
            sink.clone(),
            sink.clone(),
            RetryPolicy::none(),
        );
        let mut ctx = extracted_context(3).await;
        ctx.synthesis = Some(SynthesisResult {
            points: vec!["a".into(), "b".into(), "c".into()],
            insight: "i".into(),
        });

        step.run(&mut ctx).await.unwrap();

        // intent 70 + 20 boost = 90; 0.6 * 90 + 0.4 * 50 = 74.0
        let score = ctx.score.unwrap();
        assert_eq!(score.intent_score, 90.0);
        assert_eq!(score.save_count_boost, 20.0);
        assert_eq!(score.final_score, 74.0);
        assert_eq!(score.priority, Priority::PlanIt);

        let scores = sink.scores.lock().unwrap();
        assert_eq!(scores.as_slice(), &[(ctx.item.id.clone(), 74.0, Priority::PlanIt)]);
    }

    #[tokio::test]
    async fn todo_rejects_read_only_plans() {
        let sink = Arc::new(RecordingSink::default());
        let model = FixedModel(
            r#"{"todos": [
                {"title": "Read A", "eta": "10m", "type": "READ"},
                {"title": "Read B", "eta": "20m", "type": "READ"},
                {"title": "Read C", "eta": "1h", "type": "READ"}
            ]}"#,
        );
        let step = TodoStep::new(Arc::new(model), sink.clone(), RetryPolicy::none());
        let mut ctx = extracted_context(1).await;
        ctx.synthesis = Some(SynthesisResult {
            points: vec!["a".into(), "b".into(), "c".into()],
            insight: "i".into(),
        });
        ctx.score = Some(ScoreResult::compute(
            ScoreJudgement {
                intent_score: 50.0,
                quality_score: 50.0,
                reasons: vec![],
            },
            1,
        ));

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReaddoError::Parse { .. }));
        assert!(sink.artifacts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn todo_rejects_unknown_eta() {
        let sink = Arc::new(RecordingSink::default());
        let model = FixedModel(
            r#"{"todos": [
                {"title": "Read A", "eta": "5m", "type": "READ"},
                {"title": "Write B", "eta": "20m", "type": "WRITE"},
                {"title": "Share C", "eta": "1h", "type": "SHARE"}
            ]}"#,
        );
        let step = TodoStep::new(Arc::new(model), sink.clone(), RetryPolicy::none());
        let mut ctx = extracted_context(1).await;
        ctx.synthesis = Some(SynthesisResult {
            points: vec!["a".into(), "b".into(), "c".into()],
            insight: "i".into(),
        });
        ctx.score = Some(ScoreResult::compute(
            ScoreJudgement {
                intent_score: 90.0,
                quality_score: 90.0,
                reasons: vec![],
            },
            1,
        ));

        assert!(step.run(&mut ctx).await.is_err());
    }
}
