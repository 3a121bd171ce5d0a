//! Text normalization passes applied after HTML-to-Markdown conversion.
//!
//! Each pass is a function `&str -> String` applied in sequence. The goal is
//! compact, readable text for a language model, not faithful Markdown.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Marker appended to text cut at the length limit.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Run the full normalization pipeline on converted Markdown.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = strip_images(&result);
    result = strip_leftover_html(&result);
    result = trim_lines(&result);
    result = collapse_blank_lines(&result);

    result.trim().to_string()
}

/// Remove Markdown images; alt text and image URLs are noise for reading.
fn strip_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "").to_string()
}

/// Remove stray container tags that survived conversion, outside code fences.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|figure|figcaption|details|summary|picture|source)(?:\s[^>]*)?/?>")
            .expect("valid regex")
    });

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn trim_lines(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

/// Cut `text` to at most `max_chars` characters, appending [`TRUNCATION_MARKER`].
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Count whitespace-separated words, ignoring code fences.
pub fn count_words(text: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    CODE_BLOCK_RE
        .replace_all(text, "")
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// SHA-256 of the text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
