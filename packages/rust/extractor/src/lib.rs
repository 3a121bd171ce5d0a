//! Content extraction for readdo.
//!
//! Turns a captured URL into normalized text plus metadata. This crate provides:
//! - [`ContentExtractor`]: the capability trait used by the `extract` step
//! - [`HttpExtractor`]: fetches the page with `reqwest` and converts it with `htmd`
//! - [`StubExtractor`]: deterministic offline content
//! - [`normalize`]: text cleanup, truncation, word counting and hashing

mod content;
mod fetch;
pub mod normalize;

use async_trait::async_trait;
use tracing::info;

use readdo_shared::{ContentMeta, ExtractedContent, ExtractorConfig, Result};

pub use fetch::HttpExtractor;

/// Fetches a URL and reduces it to readable text.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Extract normalized content from `url`.
    async fn extract(&self, url: &str) -> Result<ExtractedContent>;
}

/// Build the extractor selected by `[extractor] stub`.
pub fn build_extractor(config: &ExtractorConfig) -> Result<Box<dyn ContentExtractor>> {
    if config.stub {
        info!("using stub content extractor");
        return Ok(Box::new(StubExtractor));
    }
    Ok(Box::new(HttpExtractor::new(config)?))
}

/// Returns fixed content derived from the URL without touching the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubExtractor;

#[async_trait]
impl ContentExtractor for StubExtractor {
    fn name(&self) -> &str {
        "stub"
    }

    async fn extract(&self, url: &str) -> Result<ExtractedContent> {
        let text = format!(
            "# Notes on {url}\n\n\
             This placeholder article stands in for the page at {url}. \
             It explains the main idea in plain terms, walks through a worked example, \
             and closes with practical advice on applying the idea to a real project.\n\n\
             The example shows each step in order and points out the mistakes \
             people usually make the first time they try it."
        );

        Ok(ExtractedContent {
            content_meta: ContentMeta {
                title: Some(format!("Notes on {url}")),
                author: None,
                publish_date: None,
                language: Some("en".into()),
                word_count: normalize::count_words(&text),
                content_hash: normalize::content_hash(&text),
            },
            normalized_text: text,
        })
    }
}
