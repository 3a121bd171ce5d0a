//! Core domain types for readdo items, intents and artifacts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{ReaddoError, Result};

/// Separator placed between merged intent texts.
pub const INTENT_SEPARATOR: &str = "\n---\n";

/// Default `source_type` for captured URLs.
pub const DEFAULT_SOURCE_TYPE: &str = "web";

/// Generate a new time-sortable identifier.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Format a timestamp the way it is persisted.
///
/// Fixed-width microsecond precision, so lexical order matches time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted RFC 3339 timestamp.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReaddoError::Storage(format!("invalid timestamp '{s}': {e}")))
}

/// Derive the display domain from a URL (`www.` stripped).
pub fn domain_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Processing state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Captured,
    Processing,
    Ready,
    Failed,
    Archived,
}

impl ItemStatus {
    /// All statuses in catalog display order.
    pub const ALL: [ItemStatus; 5] = [
        ItemStatus::Processing,
        ItemStatus::Captured,
        ItemStatus::Failed,
        ItemStatus::Ready,
        ItemStatus::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Captured => "CAPTURED",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Whether a user may move an item from `self` to `to`.
    ///
    /// Claiming (`CAPTURED -> PROCESSING`) and finishing
    /// (`PROCESSING -> READY | FAILED`) belong to the worker and are not
    /// listed here.
    pub fn can_transition_to(self, to: ItemStatus) -> bool {
        matches!(
            (self, to),
            (Self::Ready, Self::Archived)
                | (Self::Failed, Self::Archived)
                | (Self::Failed, Self::Captured)
                | (Self::Archived, Self::Ready)
        )
    }

    /// Validate a user-initiated transition.
    pub fn validate_transition(self, to: ItemStatus) -> Result<()> {
        if self == Self::Processing {
            return Err(ReaddoError::Conflict(
                "item is currently being processed".into(),
            ));
        }
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(ReaddoError::InvalidTransition { from: self, to })
        }
    }

    /// Statuses from which a user may move an item to `to`.
    pub fn sources_for(to: ItemStatus) -> Vec<ItemStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(to))
            .collect()
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = ReaddoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CAPTURED" => Ok(Self::Captured),
            "PROCESSING" => Ok(Self::Processing),
            "READY" => Ok(Self::Ready),
            "FAILED" => Ok(Self::Failed),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(ReaddoError::validation(format!("unknown status '{other}'"))),
        }
    }
}

/// Reading priority derived from the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    DoFirst,
    PlanIt,
    SkimIt,
    LetGo,
}

impl Priority {
    /// Map a 0-100 final score to a priority band.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::DoFirst
        } else if score >= 60.0 {
            Self::PlanIt
        } else if score >= 40.0 {
            Self::SkimIt
        } else {
            Self::LetGo
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DoFirst => "DO_FIRST",
            Self::PlanIt => "PLAN_IT",
            Self::SkimIt => "SKIM_IT",
            Self::LetGo => "LET_GO",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = ReaddoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DO_FIRST" => Ok(Self::DoFirst),
            "PLAN_IT" => Ok(Self::PlanIt),
            "SKIM_IT" => Ok(Self::SkimIt),
            "LET_GO" => Ok(Self::LetGo),
            other => Err(ReaddoError::validation(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

/// Kind of derived output stored per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Extraction,
    Synthesis,
    Score,
    Todos,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Synthesis => "synthesis",
            Self::Score => "score",
            Self::Todos => "todos",
        }
    }

    /// Only synthesis and todos may be rewritten by the user.
    pub fn is_user_editable(self) -> bool {
        matches!(self, Self::Synthesis | Self::Todos)
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = ReaddoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "extraction" => Ok(Self::Extraction),
            "synthesis" => Ok(Self::Synthesis),
            "score" => Ok(Self::Score),
            "todos" => Ok(Self::Todos),
            other => Err(ReaddoError::validation(format!(
                "unknown artifact type '{other}'"
            ))),
        }
    }
}

/// Who produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    System,
    User,
}

impl CreatedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

impl std::str::FromStr for CreatedBy {
    type Err = ReaddoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            other => Err(ReaddoError::validation(format!(
                "unknown artifact creator '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Failure details recorded on an item when processing fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub failed_step: String,
    pub message: String,
    pub retryable: bool,
    pub failed_at: String,
}

impl ErrorInfo {
    pub fn new(failed_step: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            failed_step: failed_step.into(),
            message: message.into(),
            retryable,
            failed_at: format_timestamp(&Utc::now()),
        }
    }
}

/// A captured URL and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub title: String,
    pub domain: String,
    pub source_type: String,
    pub intent_text: String,
    pub status: ItemStatus,
    pub priority: Option<Priority>,
    pub match_score: Option<f64>,
    pub error_info: Option<ErrorInfo>,
    pub save_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Build a fresh CAPTURED item from a capture request.
    pub fn from_capture(req: &CaptureRequest) -> Self {
        let now = Utc::now();
        let domain = req
            .domain
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| domain_from_url(&req.url))
            .unwrap_or_default();

        Self {
            id: new_id(),
            url: req.url.clone(),
            title: req.title.clone().unwrap_or_default(),
            domain,
            source_type: req
                .source_type
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string()),
            intent_text: req.intent_text.trim().to_string(),
            status: ItemStatus::Captured,
            priority: None,
            match_score: None,
            error_info: None,
            save_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a repeat capture into this item.
    ///
    /// Always bumps `save_count`; non-empty text is appended after
    /// [`INTENT_SEPARATOR`].
    pub fn merge_intent(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            if self.intent_text.is_empty() {
                self.intent_text = text.to_string();
            } else {
                self.intent_text = format!("{}{INTENT_SEPARATOR}{text}", self.intent_text);
            }
        }
        self.save_count += 1;
    }
}

/// One user statement of why an item was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub item_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(item_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            item_id: item_id.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// A derived output of one pipeline step (or a user edit of one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub item_id: String,
    pub artifact_type: ArtifactType,
    /// JSON document whose shape depends on `artifact_type`.
    pub payload: String,
    pub created_by: CreatedBy,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        item_id: impl Into<String>,
        artifact_type: ArtifactType,
        payload: impl Into<String>,
        created_by: CreatedBy,
    ) -> Self {
        Self {
            id: new_id(),
            item_id: item_id.into(),
            artifact_type,
            payload: payload.into(),
            created_by,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog requests and views
// ---------------------------------------------------------------------------

/// Input for capturing (or re-capturing) a URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub intent_text: String,
}

impl CaptureRequest {
    pub fn new(url: impl Into<String>, intent_text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            intent_text: intent_text.into(),
            ..Default::default()
        }
    }

    /// Reject URLs that are not absolute http(s) URLs.
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ReaddoError::validation("url is required"));
        }
        let parsed = Url::parse(url)
            .map_err(|e| ReaddoError::validation(format!("invalid url '{url}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(ReaddoError::validation(format!(
                "unsupported url scheme '{scheme}'"
            ))),
        }
    }
}

/// Result of a capture: the stored item and whether it merged into an existing one.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub item: Item,
    pub merged: bool,
}

/// Catalog listing filter. Empty vectors mean "any".
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub statuses: Vec<ItemStatus>,
    pub priorities: Vec<Priority>,
    /// Substring matched against title, domain and intent text.
    pub query: Option<String>,
}

/// An item with everything recorded about it.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    pub item: Item,
    pub artifacts: Vec<Artifact>,
    pub intents: Vec<Intent>,
}

/// Inbox (not archived) vs archive totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub inbox: u64,
    pub archive: u64,
}
