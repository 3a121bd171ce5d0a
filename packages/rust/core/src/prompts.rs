//! Prompt builders for the model-backed pipeline steps.
//!
//! Every prompt starts with a task line (`TASK: <name>`) so replies can be
//! routed without inspecting the free-form text.

use readdo_extractor::normalize::truncate_chars;
use readdo_shared::{ContentMeta, Priority, Result, SynthesisResult, to_payload};

/// Article text beyond this many characters is not sent to the model.
const MAX_PROMPT_TEXT_CHARS: usize = 12_000;

const TASK_PREFIX: &str = "TASK: ";

/// Which step a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTask {
    Synthesize,
    Score,
    Todos,
}

impl PromptTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synthesize => "synthesize",
            Self::Score => "score",
            Self::Todos => "todos",
        }
    }

    /// Recover the task from a prompt's first line.
    pub fn of_prompt(prompt: &str) -> Option<Self> {
        let name = prompt.lines().next()?.strip_prefix(TASK_PREFIX)?.trim();
        [Self::Synthesize, Self::Score, Self::Todos]
            .into_iter()
            .find(|t| t.as_str() == name)
    }

    fn header(self) -> String {
        format!("{TASK_PREFIX}{}", self.as_str())
    }
}

fn intent_or_default(intent: &str) -> &str {
    let intent = intent.trim();
    if intent.is_empty() {
        "(no intent given; judge general usefulness)"
    } else {
        intent
    }
}

pub fn synthesize_prompt(intent: &str, text: &str) -> String {
    format!(
        r#"{header}
You are a reading assistant. Distill the article below for a reader whose intent is: "{intent}"

Output ONLY valid JSON with this exact structure (no markdown, no explanation):
{{"points": ["point 1", "point 2", "point 3"], "insight": "one key insight sentence"}}

Rules:
- Exactly 3 points, each 1-2 sentences
- 1 insight that connects the article to the reader's intent
- Concise and actionable

Article text:
{text}"#,
        header = PromptTask::Synthesize.header(),
        intent = intent_or_default(intent),
        text = truncate_chars(text, MAX_PROMPT_TEXT_CHARS),
    )
}

pub fn score_prompt(
    intent: &str,
    synthesis: &SynthesisResult,
    meta: &ContentMeta,
    save_count: u32,
) -> Result<String> {
    Ok(format!(
        r#"{header}
You are a content relevance judge. Rate this article against the reader's intent.

Reader intent: "{intent}"
Synthesis: {synthesis}
Title: {title}
Word count: {words}
Times saved: {save_count}

Output ONLY valid JSON with this exact structure:
{{"intent_score": 75, "quality_score": 60, "reasons": ["reason 1", "reason 2", "reason 3"]}}

Rules:
- intent_score: integer 0-100, how directly the article serves the intent
- quality_score: integer 0-100, depth and credibility of the content
- reasons: at least 3 specific reasons referencing the intent or content"#,
        header = PromptTask::Score.header(),
        intent = intent_or_default(intent),
        synthesis = to_payload(synthesis)?,
        title = meta.title.as_deref().unwrap_or("(unknown)"),
        words = meta.word_count,
    ))
}

pub fn todos_prompt(
    intent: &str,
    synthesis: &SynthesisResult,
    priority: Priority,
) -> Result<String> {
    Ok(format!(
        r#"{header}
You are a task planner. Create actionable follow-ups for a reader who saved this article.

Reader intent: "{intent}"
Priority: {priority}
Synthesis: {synthesis}

Output ONLY valid JSON with this exact structure:
{{"todos": [{{"title": "Read the section on X", "eta": "20m", "type": "READ"}}]}}

Rules:
- 3 to 7 items
- Each title starts with a verb (Read, Write, Compare, Build, ...)
- eta: one of "10m", "20m", "30m", "45m", "1h", "2h", "3h+"
- type: one of "READ", "WRITE", "BUILD", "SHARE"
- At least 1 item must be "WRITE", "BUILD" or "SHARE"
- Align tasks with the reader's intent"#,
        header = PromptTask::Todos.header(),
        intent = intent_or_default(intent),
        synthesis = to_payload(synthesis)?,
    ))
}
