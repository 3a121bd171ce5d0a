//! HTTP-backed content extractor.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};
use url::Url;

use readdo_shared::{ContentMeta, ExtractedContent, ExtractorConfig, ReaddoError, Result};

use crate::ContentExtractor;
use crate::content;
use crate::normalize;

/// Browser-like User-Agent; many sites refuse obvious bots.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; readdo/",
    env!("CARGO_PKG_VERSION"),
    "; +https://github.com/readdo)"
);

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Fetches a page over HTTP and reduces it to normalized text.
pub struct HttpExtractor {
    client: Client,
    max_text_length: usize,
    min_text_length: usize,
    max_body_bytes: usize,
    allow_private_hosts: bool,
}

impl HttpExtractor {
    /// Build an extractor from the `[extractor]` config section.
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy(config.allow_private_hosts))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ReaddoError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_text_length: config.max_text_length,
            min_text_length: config.min_text_length,
            max_body_bytes: config.max_body_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn fetch_html(&self, url: &Url) -> Result<String> {
        debug!(%url, "fetching page");

        let mut response = self
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5")
            .send()
            .await
            .map_err(|e| {
                if e.is_redirect() {
                    ReaddoError::Extraction(format!("{url}: redirect refused: {e}"))
                } else {
                    ReaddoError::transport(format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReaddoError::http_status(
                status.as_u16(),
                format!("{url}: HTTP {status}"),
            ));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let content_type = content_type.to_ascii_lowercase();
            if !content_type.contains("html") && !content_type.starts_with("text/") {
                return Err(ReaddoError::Extraction(format!(
                    "{url}: unsupported content type '{content_type}'"
                )));
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(ReaddoError::Extraction(format!(
                    "{url}: body of {len} bytes exceeds limit of {}",
                    self.max_body_bytes
                )));
            }
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ReaddoError::transport(format!("{url}: body read failed: {e}")))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(ReaddoError::Extraction(format!(
                    "{url}: body exceeds limit of {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Turn raw HTML into the `extraction` payload.
    fn build_content(&self, url: &Url, html: &str) -> Result<ExtractedContent> {
        let page = content::extract(html)?;
        let text = normalize::run_pipeline(&page.markdown);

        let char_count = text.chars().count();
        if char_count < self.min_text_length {
            return Err(ReaddoError::Extraction(format!(
                "{url}: only {char_count} characters of content (minimum {})",
                self.min_text_length
            )));
        }

        let content_meta = ContentMeta {
            title: page.meta.title,
            author: page.meta.author,
            publish_date: page.meta.publish_date,
            language: page.meta.language,
            word_count: normalize::count_words(&text),
            content_hash: normalize::content_hash(&text),
        };

        Ok(ExtractedContent {
            normalized_text: normalize::truncate_chars(&text, self.max_text_length),
            content_meta,
        })
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), fields(extractor = "http"))]
    async fn extract(&self, url: &str) -> Result<ExtractedContent> {
        let parsed = Url::parse(url)
            .map_err(|e| ReaddoError::Extraction(format!("invalid url '{url}': {e}")))?;

        if !self.allow_private_hosts && is_blocked_target(&parsed) {
            return Err(ReaddoError::Extraction(format!(
                "{url}: refusing to fetch a non-public address"
            )));
        }

        let html = self.fetch_html(&parsed).await?;
        let content = self.build_content(&parsed, &html)?;

        debug!(
            words = content.content_meta.word_count,
            chars = content.normalized_text.len(),
            "extracted content"
        );
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Follow at most [`MAX_REDIRECTS`] hops, re-checking every target.
fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        // `previous` holds every URL fetched so far, the first one included.
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error(format!("more than {MAX_REDIRECTS} redirects"))
        } else if !allow_private_hosts && is_blocked_target(attempt.url()) {
            let target = attempt.url().to_string();
            attempt.error(format!("redirect to non-public address {target}"))
        } else {
            attempt.follow()
        }
    })
}

/// Whether a URL points somewhere a public fetcher should not go.
fn is_blocked_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (a == 100 && (b & 0xC0) == 64)
                // 192.0.0.0/24
                || (a == 192 && b == 0 && c == 0)
        }
        IpAddr::V6(v6) => {
            // ::ffff:a.b.c.d reaches the IPv4 host
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config() -> ExtractorConfig {
        ExtractorConfig {
            allow_private_hosts: true,
            timeout_secs: 5,
            ..ExtractorConfig::default()
        }
    }

    fn article_page(words: usize) -> String {
        format!(
            r#"<html lang="en"><head><title>Rust Ownership</title>
            <meta name="author" content="Ferris"></head>
            <body><nav>Home | Blog</nav>
            <article><h1>Ownership</h1><p>{}</p></article>
            <footer>Footer text</footer></body></html>"#,
            vec!["borrow"; words].join(" ")
        )
    }

    #[test]
    fn ssrf_blocks_private_and_local() {
        for url in [
            "file:///etc/passwd",
            "http://127.0.0.1/",
            "http://10.0.0.8/admin",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://localhost:8080/",
            "http://printer.local/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]:8080/",
            "http://[::ffff:10.0.0.8]/",
            "http://[::ffff:169.254.169.254]/",
        ] {
            assert!(is_blocked_target(&Url::parse(url).unwrap()), "{url}");
        }
    }

    #[test]
    fn ssrf_allows_public() {
        for url in [
            "https://example.com/post",
            "http://93.184.216.34/",
            "http://[::ffff:93.184.216.34]/",
            "http://[2606:2800:220:1::]/",
        ] {
            assert!(!is_blocked_target(&Url::parse(url).unwrap()), "{url}");
        }
    }

    #[tokio::test]
    async fn extracts_article_from_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(article_page(50)),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(&test_config()).unwrap();
        let content = extractor
            .extract(&format!("{}/post", server.uri()))
            .await
            .unwrap();

        assert!(content.normalized_text.starts_with("# Ownership"));
        assert!(!content.normalized_text.contains("Footer text"));
        assert_eq!(content.content_meta.title.as_deref(), Some("Rust Ownership"));
        assert_eq!(content.content_meta.author.as_deref(), Some("Ferris"));
        assert_eq!(content.content_meta.language.as_deref(), Some("en"));
        assert_eq!(content.content_meta.word_count, 51);
        assert_eq!(content.content_meta.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn truncates_long_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article_page(500)))
            .mount(&server)
            .await;

        let config = ExtractorConfig {
            max_text_length: 200,
            ..test_config()
        };
        let extractor = HttpExtractor::new(&config).unwrap();
        let content = extractor.extract(&server.uri()).await.unwrap();

        assert!(content.normalized_text.ends_with(normalize::TRUNCATION_MARKER));
        assert_eq!(
            content.normalized_text.chars().count(),
            200 + normalize::TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn rejects_short_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><p>Nothing to see.</p></body></html>",
            ))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(&test_config()).unwrap();
        let err = extractor.extract(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ReaddoError::Extraction(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn classifies_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(&test_config()).unwrap();

        let gone = extractor
            .extract(&format!("{}/gone", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(gone, ReaddoError::Upstream { status: Some(404), .. }));
        assert!(!gone.is_retryable());

        let busy = extractor
            .extract(&format!("{}/busy", server.uri()))
            .await
            .unwrap_err();
        assert!(busy.is_retryable());
    }

    #[tokio::test]
    async fn rejects_non_html_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(vec![0u8; 16]),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(&test_config()).unwrap();
        let err = extractor.extract(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ReaddoError::Extraction(_)));
    }

    #[tokio::test]
    async fn refuses_private_hosts_by_default() {
        let extractor = HttpExtractor::new(&ExtractorConfig::default()).unwrap();
        let err = extractor.extract("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, ReaddoError::Extraction(_)));
    }

    #[tokio::test]
    async fn refuses_ipv4_mapped_loopback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article_page(60)))
            .expect(0)
            .mount(&server)
            .await;
        let port = server.address().port();

        let extractor = HttpExtractor::new(&ExtractorConfig::default()).unwrap();
        let err = extractor
            .extract(&format!("http://[::ffff:127.0.0.1]:{port}/admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReaddoError::Extraction(_)));
    }

    #[tokio::test]
    async fn redirect_to_private_host_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hop"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://169.254.169.254/latest/meta-data"),
            )
            .mount(&server)
            .await;

        // The first hop is the local mock server, so go below the
        // up-front host check and let the redirect policy decide.
        let extractor = HttpExtractor::new(&ExtractorConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/hop", server.uri())).unwrap();
        let err = extractor.fetch_html(&url).await.unwrap_err();

        assert!(matches!(err, ReaddoError::Extraction(_)), "{err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn follows_allowed_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/post", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article_page(50)))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(&test_config()).unwrap();
        let content = extractor
            .extract(&format!("{}/old", server.uri()))
            .await
            .unwrap();
        assert_eq!(content.content_meta.title.as_deref(), Some("Rust Ownership"));
    }

    #[tokio::test]
    async fn long_redirect_chains_stop() {
        let server = MockServer::start().await;
        for hop in 0..10 {
            Mock::given(method("GET"))
                .and(path(format!("/r{hop}")))
                .respond_with(ResponseTemplate::new(302).insert_header(
                    "location",
                    format!("{}/r{}", server.uri(), hop + 1).as_str(),
                ))
                .mount(&server)
                .await;
        }

        let extractor = HttpExtractor::new(&test_config()).unwrap();
        let err = extractor
            .extract(&format!("{}/r0", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReaddoError::Extraction(_)), "{err}");
        assert_eq!(server.received_requests().await.unwrap().len(), MAX_REDIRECTS + 1);
    }
}
