//! Typed artifact payloads produced by the processing pipeline.
//!
//! Each payload is stored as a JSON document in the `artifacts` table.

use serde::{Deserialize, Serialize};

use crate::error::{ReaddoError, Result};
use crate::types::{ArtifactType, Priority};

/// Number of key points a synthesis must carry.
pub const SYNTHESIS_POINTS: usize = 3;

/// Allowed number of action items.
pub const MIN_TODOS: usize = 3;
pub const MAX_TODOS: usize = 7;

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Metadata gathered alongside the extracted text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub word_count: usize,
    pub content_hash: String,
}

/// Normalized page text plus metadata (the `extraction` artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub normalized_text: String,
    pub content_meta: ContentMeta,
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Three key points and one insight (the `synthesis` artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub points: Vec<String>,
    pub insight: String,
}

impl SynthesisResult {
    /// Enforce exactly [`SYNTHESIS_POINTS`] non-empty points and an insight.
    ///
    /// Extra points are dropped; too few is an error.
    pub fn normalize(mut self) -> Result<Self> {
        self.points = self
            .points
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if self.points.len() < SYNTHESIS_POINTS {
            return Err(ReaddoError::parse(format!(
                "synthesis needs {SYNTHESIS_POINTS} points, got {}",
                self.points.len()
            )));
        }
        self.points.truncate(SYNTHESIS_POINTS);

        self.insight = self.insight.trim().to_string();
        if self.insight.is_empty() {
            return Err(ReaddoError::parse("synthesis insight is empty"));
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Raw relevance judgement returned by the completion model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreJudgement {
    pub intent_score: f64,
    pub quality_score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Final score with its derivation (the `score` artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub intent_score: f64,
    pub quality_score: f64,
    /// Points added to `intent_score` for repeated captures.
    pub save_count_boost: f64,
    pub final_score: f64,
    pub priority: Priority,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ScoreResult {
    /// Weight of the intent match in the final score.
    pub const INTENT_WEIGHT: f64 = 0.6;
    /// Weight of content quality in the final score.
    pub const QUALITY_WEIGHT: f64 = 0.4;

    /// Combine a model judgement with the item's save count.
    ///
    /// Each capture after the first adds 10 intent points, at most 20.
    pub fn compute(judgement: ScoreJudgement, save_count: u32) -> Self {
        let intent = judgement.intent_score.clamp(0.0, 100.0);
        let quality = judgement.quality_score.clamp(0.0, 100.0);

        let boost = (f64::from(save_count.saturating_sub(1)) * 10.0).min(20.0);
        let boosted_intent = (intent + boost).min(100.0);

        let raw = boosted_intent * Self::INTENT_WEIGHT + quality * Self::QUALITY_WEIGHT;
        let final_score = (raw * 10.0).round() / 10.0;

        Self {
            intent_score: boosted_intent,
            quality_score: quality,
            save_count_boost: boosted_intent - intent,
            final_score,
            priority: Priority::from_score(final_score),
            reasons: judgement.reasons,
        }
    }
}

// ---------------------------------------------------------------------------
// Todos
// ---------------------------------------------------------------------------

/// Estimated effort of an action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eta {
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "20m")]
    TwentyMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "45m")]
    FortyFiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "3h+")]
    ThreeHoursPlus,
}

/// What kind of action an item asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TodoType {
    Read,
    Write,
    Build,
    Share,
}

/// A single action item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    pub eta: Eta,
    #[serde(rename = "type")]
    pub todo_type: TodoType,
}

/// The `todos` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodosResult {
    pub todos: Vec<TodoItem>,
}

impl TodosResult {
    /// Check count bounds, titles and that at least one item goes beyond reading.
    pub fn validate(&self) -> Result<()> {
        let n = self.todos.len();
        if !(MIN_TODOS..=MAX_TODOS).contains(&n) {
            return Err(ReaddoError::parse(format!(
                "expected {MIN_TODOS}-{MAX_TODOS} todos, got {n}"
            )));
        }
        if self.todos.iter().any(|t| t.title.trim().is_empty()) {
            return Err(ReaddoError::parse("todo title is empty"));
        }
        if self.todos.iter().all(|t| t.todo_type == TodoType::Read) {
            return Err(ReaddoError::parse(
                "at least one todo must be WRITE, BUILD or SHARE",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serialize a payload for storage.
///
/// Payloads are plain data built by this crate, so a failure here is a bug.
pub fn to_payload<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        debug_assert!(false, "payload serialization failed: {e}");
        ReaddoError::Serialization(e.to_string())
    })
}

/// Validate a user-supplied payload for an editable artifact type.
///
/// Returns the payload re-serialized in canonical form.
pub fn validate_user_payload(artifact_type: ArtifactType, payload: &str) -> Result<String> {
    match artifact_type {
        ArtifactType::Synthesis => {
            let parsed: SynthesisResult = serde_json::from_str(payload)
                .map_err(|e| ReaddoError::validation(format!("invalid synthesis payload: {e}")))?;
            let normalized = parsed
                .normalize()
                .map_err(|e| ReaddoError::validation(e.to_string()))?;
            to_payload(&normalized)
        }
        ArtifactType::Todos => {
            let parsed: TodosResult = serde_json::from_str(payload)
                .map_err(|e| ReaddoError::validation(format!("invalid todos payload: {e}")))?;
            parsed
                .validate()
                .map_err(|e| ReaddoError::validation(e.to_string()))?;
            to_payload(&parsed)
        }
        other => Err(ReaddoError::validation(format!(
            "artifact type '{other}' cannot be edited"
        ))),
    }
}
