use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use url::Url;

/// A fetched representation of a URL.
///
/// Produced by a [`Fetch`](super::Fetch) implementation and never mutated
/// afterwards. Header lookups are case-insensitive (`HeaderMap` semantics).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    url: Url,
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Document {
    /// Creates an empty `200 OK` document for `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            status: 200,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn from_parts(url: Url, status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            url,
            status,
            headers,
            body,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header. Names or values that are not valid HTTP tokens are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                tracing::debug!(header = %name, "Dropping invalid header on document");
            }
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The declared `Content-Type`, verbatim.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// A document that has been positively classified as a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedFeed {
    document: Document,
}

impl VerifiedFeed {
    pub(crate) fn new(document: Document) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn url(&self) -> &Url {
        self.document.url()
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(Url::parse("http://example.com/feed/").unwrap())
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let doc = doc().with_header("Content-Type", "application/atom+xml");
        assert_eq!(doc.header("content-type"), Some("application/atom+xml"));
        assert_eq!(doc.header("CONTENT-TYPE"), Some("application/atom+xml"));
        assert_eq!(doc.content_type(), Some("application/atom+xml"));
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let doc = doc().with_header("bad header", "x");
        assert!(doc.headers().is_empty());
    }

    #[test]
    fn test_status_success_range() {
        assert!(doc().is_success());
        assert!(doc().with_status(204).is_success());
        assert!(!doc().with_status(304).is_success());
        assert!(!doc().with_status(404).is_success());
    }
}
