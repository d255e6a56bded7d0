//! Content classification: "is this response a feed?"
//!
//! The sniffing rules follow the declared `Content-Type` when it is specific
//! enough and fall back to inspecting the start of the body otherwise. Input
//! is never rejected: anything unrecognizable is simply "not a feed".

/// Declared types that are accepted as feeds without looking at the body.
pub const FEED_MIME_TYPES: [&str; 7] = [
    "application/rss+xml",
    "application/rdf+xml",
    "text/rdf",
    "application/atom+xml",
    "text/xml",
    "application/xml",
    "application/x-rss+xml",
];

/// How many body bytes the sniffer looks at.
const SNIFF_WINDOW: usize = 4096;

const RSS_1_0_NAMESPACE: &[u8] = b"http://purl.org/rss/1.0/";

/// Single-capability classification seam used by the locator.
pub trait Classifier: Send + Sync {
    /// Returns true if a response with this declared type and body is a feed.
    ///
    /// `body_prefix` may be the whole body or only its first bytes.
    fn looks_like_feed(&self, content_type: Option<&str>, body_prefix: &[u8]) -> bool;
}

/// Result of content-type sniffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    /// A feed; carries the effective MIME type.
    Feed(String),
    Html,
    /// Anything else; carries the effective MIME type.
    Other(String),
}

/// Default classifier backed by [`sniff`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffingClassifier;

impl Classifier for SniffingClassifier {
    fn looks_like_feed(&self, content_type: Option<&str>, body_prefix: &[u8]) -> bool {
        matches!(sniff(content_type, body_prefix), Sniffed::Feed(_))
    }
}

/// Determines the effective type of a response.
pub fn sniff(content_type: Option<&str>, body: &[u8]) -> Sniffed {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let declared = content_type.map(essence).unwrap_or_default();

    match declared.as_str() {
        "" | "unknown/unknown" | "application/unknown" | "*/*" => sniff_unknown(window),
        "text/html" => feed_or_html(window),
        "application/xhtml+xml" => Sniffed::Html,
        mime if FEED_MIME_TYPES.contains(&mime) => Sniffed::Feed(mime.to_owned()),
        mime => Sniffed::Other(mime.to_owned()),
    }
}

/// Lowercased MIME essence without parameters (`text/html; charset=utf-8` -> `text/html`).
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Body sniffing for responses with no usable declared type.
fn sniff_unknown(body: &[u8]) -> Sniffed {
    let start = skip_whitespace(body, 0);
    let head = &body[start..];

    const HTML_OPENERS: [&[u8]; 5] = [b"<!doctype html", b"<html", b"<head", b"<script", b"<body"];
    if HTML_OPENERS.iter().any(|p| starts_with_ignore_case(head, p)) {
        return Sniffed::Html;
    }

    const SIGNATURES: [(&[u8], &str); 7] = [
        (b"%PDF-", "application/pdf"),
        (b"%!PS-Adobe-", "application/postscript"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"BM", "image/bmp"),
    ];
    if let Some((_, mime)) = SIGNATURES.iter().find(|(sig, _)| head.starts_with(sig)) {
        return Sniffed::Other((*mime).to_owned());
    }

    // A feed served without a type is still a feed
    match feed_or_html(body) {
        Sniffed::Html if head.is_empty() || !head.starts_with(b"<") => {
            Sniffed::Other("text/plain".to_owned())
        }
        sniffed => sniffed,
    }
}

/// Distinguishes feed markup from HTML by the first significant element.
fn feed_or_html(body: &[u8]) -> Sniffed {
    let mut pos = skip_whitespace(body, 0);

    loop {
        let rest = &body[pos..];
        let skip_to = if rest.starts_with(b"<!--") {
            find(rest, b"-->").map(|i| i + 3)
        } else if rest.starts_with(b"<!") {
            find(rest, b">").map(|i| i + 1)
        } else if rest.starts_with(b"<?") {
            find(rest, b"?>").map(|i| i + 2)
        } else {
            break;
        };

        match skip_to {
            Some(offset) => pos = skip_whitespace(body, pos + offset),
            None => return Sniffed::Html,
        }
    }

    let rest = &body[pos..];
    if rest.starts_with(b"<rss") {
        Sniffed::Feed("application/rss+xml".to_owned())
    } else if rest.starts_with(b"<feed") {
        Sniffed::Feed("application/atom+xml".to_owned())
    } else if rest.starts_with(b"<rdf:RDF") && find(rest, RSS_1_0_NAMESPACE).is_some() {
        Sniffed::Feed("application/rdf+xml".to_owned())
    } else {
        Sniffed::Html
    }
}

fn skip_whitespace(body: &[u8], from: usize) -> usize {
    body[from.min(body.len())..]
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c'))
        .map_or(body.len(), |i| from + i)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn starts_with_ignore_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}
