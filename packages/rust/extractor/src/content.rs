//! Main-content selection, metadata extraction and HTML-to-Markdown conversion.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use readdo_shared::{ReaddoError, Result};

/// Containers tried in order when looking for the article body.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".post-content",
    ".entry-content",
    ".content",
    "#content",
];

/// Tags dropped during conversion: page chrome and non-text elements.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg", "form",
    "button",
];

/// Content containers with less text than this are passed over.
const MIN_CONTAINER_CHARS: usize = 200;

/// Metadata read from the document head.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PageMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub language: Option<String>,
}

/// A page reduced to its main content.
#[derive(Debug, Clone)]
pub(crate) struct PageContent {
    pub markdown: String,
    pub meta: PageMetadata,
}

/// Parse an HTML document, pick the main content and convert it to Markdown.
pub(crate) fn extract(html: &str) -> Result<PageContent> {
    let doc = Html::parse_document(html);
    let meta = read_metadata(&doc);
    let content_html = main_content_html(&doc);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let markdown = converter
        .convert(&content_html)
        .map_err(|e| ReaddoError::Extraction(format!("htmd conversion failed: {e}")))?;

    debug!(
        html_len = html.len(),
        markdown_len = markdown.len(),
        title = meta.title.as_deref().unwrap_or(""),
        "converted page"
    );

    Ok(PageContent { markdown, meta })
}

/// Inner HTML of the first substantial content container, or `<body>`.
fn main_content_html(doc: &Html) -> String {
    for sel_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        let candidate = doc
            .select(&selector)
            .find(|el| text_len(el) >= MIN_CONTAINER_CHARS);
        if let Some(el) = candidate {
            return el.inner_html();
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    doc.root_element().inner_html()
}

fn text_len(el: &ElementRef) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

fn read_metadata(doc: &Html) -> PageMetadata {
    PageMetadata {
        title: meta_content(doc, &["meta[property=\"og:title\"]"])
            .or_else(|| element_text(doc, "title"))
            .or_else(|| element_text(doc, "h1")),
        author: meta_content(
            doc,
            &["meta[name=\"author\"]", "meta[property=\"article:author\"]"],
        )
        .or_else(|| element_text(doc, "[rel=\"author\"]")),
        publish_date: meta_content(
            doc,
            &[
                "meta[property=\"article:published_time\"]",
                "meta[name=\"date\"]",
                "meta[itemprop=\"datePublished\"]",
            ],
        )
        .or_else(|| attr_value(doc, "time[datetime]", "datetime")),
        language: attr_value(doc, "html", "lang"),
    }
}

/// `content` attribute of the first matching `<meta>` among `selectors`.
fn meta_content(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .find_map(|sel| attr_value(doc, sel, "content"))
}

fn attr_value(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(String::from)
}

fn element_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .map(|el| {
            el.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .find(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize) -> String {
        vec!["lorem"; words].join(" ")
    }

    #[test]
    fn prefers_article_over_chrome() {
        let html = format!(
            r#"<html lang="en"><head><title>Doc Title</title></head><body>
                <nav><a href="/">Home</a> <a href="/about">About</a></nav>
                <article><h1>Heading</h1><p>{}</p></article>
                <footer>Copyright 2024</footer>
            </body></html>"#,
            paragraph(60)
        );
        let page = extract(&html).unwrap();
        assert!(page.markdown.contains("# Heading"));
        assert!(page.markdown.contains("lorem lorem"));
        assert!(!page.markdown.contains("Copyright"));
        assert!(!page.markdown.contains("About"));
        assert_eq!(page.meta.title.as_deref(), Some("Doc Title"));
        assert_eq!(page.meta.language.as_deref(), Some("en"));
    }

    #[test]
    fn skips_tiny_containers() {
        let html = format!(
            r#"<html><body>
                <main>short teaser</main>
                <div class="content"><p>{}</p></div>
            </body></html>"#,
            paragraph(60)
        );
        let page = extract(&html).unwrap();
        assert!(!page.markdown.contains("short teaser"));
        assert!(page.markdown.contains("lorem"));
    }

    #[test]
    fn falls_back_to_body() {
        let page = extract("<html><body><p>Just a paragraph.</p></body></html>").unwrap();
        assert!(page.markdown.contains("Just a paragraph."));
    }

    #[test]
    fn reads_article_metadata() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <meta name="author" content="Ada Lovelace">
            <meta property="article:published_time" content="2024-03-01T09:00:00Z">
        </head><body><p>x</p></body></html>"#;
        let page = extract(html).unwrap();
        assert_eq!(page.meta.title.as_deref(), Some("OG Title"));
        assert_eq!(page.meta.author.as_deref(), Some("Ada Lovelace"));
        assert_eq!(page.meta.publish_date.as_deref(), Some("2024-03-01T09:00:00Z"));
        assert_eq!(page.meta.language, None);
    }

    #[test]
    fn time_element_as_date_fallback() {
        let html = r#"<html><body><time datetime="2023-12-24">Dec 24</time></body></html>"#;
        let page = extract(html).unwrap();
        assert_eq!(page.meta.publish_date.as_deref(), Some("2023-12-24"));
    }
}
