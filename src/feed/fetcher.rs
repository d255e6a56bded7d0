use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::redirect::Policy;
use thiserror::Error;
use url::Url;

use super::document::Document;
use crate::cache::Validators;
use crate::util::validate_url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_MAX_RETRIES: u32 = 3;
const MAX_BACKOFF_SECS: u64 = 60;
const MAX_REDIRECTS: usize = 5;
const DEFAULT_USER_AGENT: &str = concat!("feedscout/", env!("CARGO_PKG_VERSION"));

/// Errors a [`Fetch`] implementation can report.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The URL was rejected before any request was made
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Failure reported by a non-HTTP transport
    #[error("Transport error: {0}")]
    Transport(String),
}

/// The File role: turns an absolute URL into a [`Document`].
///
/// Implementations own their timeout and retry policy. A non-2xx response is
/// not an error; it comes back as a document carrying that status.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Document, FetchError>;

    /// Conditional fetch using stored validators. Transports that cannot send
    /// validators fall back to an unconditional fetch.
    async fn fetch_conditional(
        &self,
        url: &Url,
        validators: &Validators,
    ) -> Result<Document, FetchError> {
        let _ = validators;
        self.fetch(url).await
    }
}

/// Tunables for [`HttpFile`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub max_retries: u32,
    pub user_agent: String,
    /// Disables the SSRF guard (localhost and private ranges).
    pub allow_private_hosts: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            allow_private_hosts: false,
        }
    }
}

/// Default File implementation over `reqwest`.
///
/// # Behavior
///
/// - Each request is bounded by `settings.timeout`
/// - 429 responses back off exponentially and fail with
///   [`FetchError::RateLimited`] once retries run out
/// - 5xx responses back off exponentially; the last one is returned as a document
/// - Bodies larger than `settings.max_body_bytes` fail with [`FetchError::ResponseTooLarge`]
/// - Short reads (fewer bytes than Content-Length) are retried
#[derive(Debug, Clone)]
pub struct HttpFile {
    client: reqwest::Client,
    settings: HttpSettings,
}

impl HttpFile {
    pub fn new(settings: HttpSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(redirect_policy(settings.allow_private_hosts))
            .build()?;
        Ok(Self { client, settings })
    }

    /// Wraps a caller-configured client.
    pub fn with_client(client: reqwest::Client, settings: HttpSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    async fn send(&self, url: &Url, extra: HeaderMap) -> Result<Document, FetchError> {
        if !self.settings.allow_private_hosts {
            validate_url(url.as_str()).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        }

        let mut retry_count = 0;

        loop {
            let request = self.client.get(url.clone()).headers(extra.clone());
            let response = tokio::time::timeout(self.settings.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.settings.max_retries {
                    return Err(FetchError::RateLimited(self.settings.max_retries));
                }
                let delay = backoff_delay(retry_count); // 1s, 2s, 4s
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_secs = delay.as_secs(),
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() && retry_count < self.settings.max_retries {
                let delay = backoff_delay(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_secs = delay.as_secs(),
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            let final_url = response.url().clone();
            let headers = response.headers().clone();

            match read_limited_bytes(response, self.settings.max_body_bytes).await {
                Ok(body) => {
                    return Ok(Document::from_parts(
                        final_url,
                        status.as_u16(),
                        headers,
                        body,
                    ))
                }
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < self.settings.max_retries =>
                {
                    let delay = backoff_delay(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected,
                        received,
                        attempt = retry_count + 1,
                        delay_secs = delay.as_secs(),
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for HttpFile {
    fn default() -> Self {
        let settings = HttpSettings::default();
        match Self::new(settings.clone()) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, "HTTP client setup failed, redirects disabled");
                let client = reqwest::Client::builder()
                    .redirect(Policy::none())
                    .build()
                    .unwrap_or_default();
                Self::with_client(client, settings)
            }
        }
    }
}

/// Exponential backoff, capped at [`MAX_BACKOFF_SECS`].
fn backoff_delay(retry_count: u32) -> Duration {
    let secs = 2u64
        .checked_pow(retry_count)
        .map_or(MAX_BACKOFF_SECS, |secs| secs.min(MAX_BACKOFF_SECS));
    Duration::from_secs(secs)
}

/// Limits redirect hops and re-applies the SSRF guard to every hop.
fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous(), allow_private_hosts) {
            Ok(()) => {
                tracing::debug!(
                    from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
                    to = %attempt.url(),
                    hop = attempt.previous().len(),
                    "Following redirect"
                );
                attempt.follow()
            }
            Err(reason) => attempt.error(reason),
        }
    })
}

fn check_redirect(next: &Url, previous: &[Url], allow_private_hosts: bool) -> Result<(), String> {
    if previous.len() > MAX_REDIRECTS {
        return Err(format!("Too many redirects (max {MAX_REDIRECTS})"));
    }
    if previous.iter().any(|prev| prev == next) {
        return Err("Redirect loop detected".to_owned());
    }
    if !allow_private_hosts {
        validate_url(next.as_str()).map_err(|e| format!("Redirect to {next} refused: {e}"))?;
    }
    Ok(())
}

#[async_trait]
impl Fetch for HttpFile {
    async fn fetch(&self, url: &Url) -> Result<Document, FetchError> {
        self.send(url, HeaderMap::new()).await
    }

    async fn fetch_conditional(
        &self,
        url: &Url,
        validators: &Validators,
    ) -> Result<Document, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(etag) = validators.etag.as_deref() {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        if let Some(modified) = validators.last_modified {
            let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            if let Ok(value) = HeaderValue::from_str(&http_date) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }
        self.send(url, headers).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn local_file() -> HttpFile {
        HttpFile::new(HttpSettings {
            allow_private_hosts: true,
            ..HttpSettings::default()
        })
        .unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_returns_document() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(VALID_RSS, "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let doc = local_file()
            .fetch(&url(&mock_server, "/feed"))
            .await
            .unwrap();
        assert_eq!(doc.status(), 200);
        assert_eq!(doc.content_type(), Some("application/rss+xml"));
        assert_eq!(doc.body(), VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_404_is_a_document_not_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let doc = local_file()
            .fetch(&url(&mock_server, "/missing"))
            .await
            .unwrap();
        assert_eq!(doc.status(), 404);
        assert!(!doc.is_success());
    }

    fn one_retry_file() -> HttpFile {
        HttpFile::new(HttpSettings {
            allow_private_hosts: true,
            max_retries: 1,
            ..HttpSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_returns_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2) // Initial request + 1 retry
            .mount(&mock_server)
            .await;

        let doc = one_retry_file()
            .fetch(&url(&mock_server, "/feed"))
            .await
            .unwrap();
        assert_eq!(doc.status(), 500);
    }

    #[tokio::test]
    async fn test_fetch_429_exhausts_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = one_retry_file().fetch(&url(&mock_server, "/feed")).await;
        assert!(matches!(result, Err(FetchError::RateLimited(1))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&mock_server)
            .await;

        let file = HttpFile::new(HttpSettings {
            allow_private_hosts: true,
            max_body_bytes: 16,
            ..HttpSettings::default()
        })
        .unwrap();
        let result = file.fetch(&url(&mock_server, "/big")).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_private_hosts_blocked_by_default() {
        let file = HttpFile::new(HttpSettings::default()).unwrap();
        let result = file
            .fetch(&Url::parse("http://127.0.0.1/feed").unwrap())
            .await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_conditional_fetch_sends_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("if-none-match", "\"abc\""))
            // The header() matcher splits values on commas, which HTTP dates contain
            .and(|request: &Request| {
                request
                    .headers
                    .get("if-modified-since")
                    .is_some_and(|value| value == "Tue, 02 Jan 2024 03:04:05 GMT")
            })
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let validators = Validators {
            etag: Some("\"abc\"".to_owned()),
            last_modified: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        };
        let doc = local_file()
            .fetch_conditional(&url(&mock_server, "/feed"), &validators)
            .await
            .unwrap();
        assert_eq!(doc.status(), 304);
    }

    #[tokio::test]
    async fn test_redirects_are_followed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/feed"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(VALID_RSS, "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let doc = local_file()
            .fetch(&url(&mock_server, "/old"))
            .await
            .unwrap();
        assert_eq!(doc.status(), 200);
        assert_eq!(doc.url(), &url(&mock_server, "/feed"));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/a"))
            .mount(&mock_server)
            .await;

        let result = local_file().fetch(&url(&mock_server, "/a")).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[test]
    fn test_redirect_hops_are_validated() {
        let start = Url::parse("https://example.com/feed").unwrap();
        let history = [start.clone()];

        let public = Url::parse("https://cdn.example.org/feed.xml").unwrap();
        assert!(check_redirect(&public, &history, false).is_ok());

        for target in [
            "http://127.0.0.1/admin",
            "http://localhost:8080/",
            "http://10.0.0.5/feed",
            "http://169.254.169.254/latest/meta-data/",
        ] {
            let target = Url::parse(target).unwrap();
            assert!(check_redirect(&target, &history, false).is_err(), "{target}");
            assert!(check_redirect(&target, &history, true).is_ok(), "{target}");
        }

        assert!(check_redirect(&start, &history, true).is_err());
        let long: Vec<Url> = (0..=MAX_REDIRECTS)
            .map(|i| Url::parse(&format!("https://example.com/{i}")).unwrap())
            .collect();
        assert!(check_redirect(&public, &long, true).is_err());
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_delay(64), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[test]
    fn test_default_file_uses_configured_user_agent() {
        let file = HttpFile::default();
        assert_eq!(file.settings().user_agent, DEFAULT_USER_AGENT);
        assert!(!file.settings().allow_private_hosts);
    }
}
