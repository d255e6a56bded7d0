//! Candidate extraction from HTML documents.
//!
//! The document is parsed once with `scraper` (html5ever), which never fails:
//! malformed markup yields whatever elements the tree builder recovered, and
//! non-HTML input yields an empty tree with no references in it.

use std::collections::HashSet;

use scraper::{ElementRef, Html};
use serde::Deserialize;
use url::Url;

use super::document::Document;
use super::policy::{DiscoveryPolicy, Strategy};
use crate::util::{resolve_reference, same_origin};

/// Replaceable string heuristics used by discovery.
///
/// Defaults:
/// - `feed_extensions`: `.rss`, `.rdf`, `.atom`, `.xml`
/// - `body_keywords`: `feed`, `rss`, `rdf`, `atom`, `xml`
/// - `rejected_markers`: `bogus`
/// - `autodiscovery_types`: RSS, Atom, RDF and generic XML media types
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Path extensions (with the dot) that mark an anchor as a feed link.
    pub feed_extensions: Vec<String>,
    /// Case-insensitive keywords matched against anchor text and target.
    pub body_keywords: Vec<String>,
    /// Case-insensitive substrings that reject a candidate before fetching.
    pub rejected_markers: Vec<String>,
    /// `type` values accepted on `rel="alternate"` references.
    pub autodiscovery_types: Vec<String>,
}

impl Default for Heuristics {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| (*s).to_owned()).collect() };
        Self {
            feed_extensions: owned(&[".rss", ".rdf", ".atom", ".xml"]),
            body_keywords: owned(&["feed", "rss", "rdf", "atom", "xml"]),
            rejected_markers: owned(&["bogus"]),
            autodiscovery_types: owned(&[
                "application/rss+xml",
                "application/atom+xml",
                "application/rdf+xml",
                "application/xml",
                "text/xml",
            ]),
        }
    }
}

impl Heuristics {
    pub fn has_feed_extension(&self, url: &Url) -> bool {
        let last_segment = url.path().rsplit('/').next().unwrap_or_default();
        let Some(dot) = last_segment.rfind('.') else {
            return false;
        };
        let extension = last_segment[dot..].to_ascii_lowercase();
        self.feed_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(&extension))
    }

    pub fn mentions_keyword(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.body_keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    }

    /// The first marker contained in `url`, if any.
    pub fn rejected_marker(&self, url: &str) -> Option<&str> {
        let lower = url.to_lowercase();
        self.rejected_markers
            .iter()
            .find(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
            .map(String::as_str)
    }

    fn accepts_autodiscovery_type(&self, declared: &str) -> bool {
        let essence = declared.split(';').next().unwrap_or_default().trim();
        self.autodiscovery_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(essence))
    }
}

/// An unverified reference that might point to a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute http(s) URL, fragment removed.
    pub url: Url,
    /// Strategy that produced the candidate first.
    pub source: Strategy,
    /// Position within `source`'s output.
    pub discovery_rank: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateExtractor {
    heuristics: Heuristics,
}

impl CandidateExtractor {
    pub fn new(heuristics: Heuristics) -> Self {
        Self { heuristics }
    }

    pub fn heuristics(&self) -> &Heuristics {
        &self.heuristics
    }

    /// Extracts candidates for every enabled strategy, in strategy order.
    ///
    /// Candidates are deduplicated by URL across strategies; the first
    /// occurrence keeps its strategy and rank. The result depends only on
    /// `document` and `policy`.
    pub fn extract(&self, document: &Document, policy: DiscoveryPolicy) -> Vec<Candidate> {
        if policy.is_none() {
            return Vec::new();
        }

        let page = Page::scan(document, &self.heuristics);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for strategy in policy.strategies() {
            let mut rank = 0;
            for url in page.references(strategy, document.url(), &self.heuristics) {
                if seen.insert(url.clone()) {
                    candidates.push(Candidate {
                        url: url.clone(),
                        source: strategy,
                        discovery_rank: rank,
                    });
                    rank += 1;
                }
            }
        }

        tracing::debug!(
            url = %document.url(),
            policy = ?policy,
            candidates = candidates.len(),
            "Extracted feed candidates"
        );
        candidates
    }
}

struct Anchor {
    url: Url,
    text: String,
}

/// The link-like structure of one HTML document.
struct Page {
    autodiscovery: Vec<Url>,
    anchors: Vec<Anchor>,
}

impl Page {
    fn scan(document: &Document, heuristics: &Heuristics) -> Self {
        let html = Html::parse_document(&String::from_utf8_lossy(document.body()));
        let elements: Vec<ElementRef<'_>> = html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect();

        let base = elements
            .iter()
            .filter(|el| el.value().name() == "base")
            .find_map(|el| el.value().attr("href"))
            .and_then(|href| resolve_reference(href, document.url()))
            .unwrap_or_else(|| document.url().clone());

        let mut autodiscovery = Vec::new();
        let mut anchors = Vec::new();

        for el in &elements {
            let name = el.value().name();
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let Some(url) = resolve_reference(href, &base) else {
                continue;
            };

            if matches!(name, "link" | "a" | "area") && is_autodiscovery_link(el, heuristics) {
                autodiscovery.push(url.clone());
            }

            if name == "a" {
                let mut text: String = el.text().collect();
                if let Some(title) = el.value().attr("title") {
                    text.push(' ');
                    text.push_str(title);
                }
                anchors.push(Anchor { url, text });
            }
        }

        Self {
            autodiscovery,
            anchors,
        }
    }

    fn references<'p>(
        &'p self,
        strategy: Strategy,
        origin: &'p Url,
        heuristics: &'p Heuristics,
    ) -> Box<dyn Iterator<Item = &'p Url> + 'p> {
        let local = move |a: &&Anchor| same_origin(&a.url, origin);
        let remote = move |a: &&Anchor| !same_origin(&a.url, origin);
        let by_extension = move |a: &&Anchor| heuristics.has_feed_extension(&a.url);
        let by_body = move |a: &&Anchor| {
            heuristics.mentions_keyword(&a.text) || heuristics.mentions_keyword(a.url.as_str())
        };

        match strategy {
            Strategy::Autodiscovery => Box::new(self.autodiscovery.iter()),
            Strategy::LocalExtension => Box::new(
                self.anchors
                    .iter()
                    .filter(local)
                    .filter(by_extension)
                    .map(|a| &a.url),
            ),
            Strategy::LocalBody => Box::new(
                self.anchors
                    .iter()
                    .filter(local)
                    .filter(by_body)
                    .map(|a| &a.url),
            ),
            Strategy::RemoteExtension => Box::new(
                self.anchors
                    .iter()
                    .filter(remote)
                    .filter(by_extension)
                    .map(|a| &a.url),
            ),
            Strategy::RemoteBody => Box::new(
                self.anchors
                    .iter()
                    .filter(remote)
                    .filter(by_body)
                    .map(|a| &a.url),
            ),
        }
    }
}

/// `rel` contains `feed`, or `alternate` with an accepted `type`; never a stylesheet.
fn is_autodiscovery_link(el: &ElementRef<'_>, heuristics: &Heuristics) -> bool {
    let Some(rel) = el.value().attr("rel") else {
        return false;
    };
    let rel: Vec<String> = rel
        .split_ascii_whitespace()
        .map(str::to_ascii_lowercase)
        .collect();
    let has = |token: &str| rel.iter().any(|r| r == token);

    if has("stylesheet") {
        return false;
    }
    if has("feed") {
        return true;
    }
    has("alternate")
        && el
            .value()
            .attr("type")
            .is_some_and(|t| heuristics.accepts_autodiscovery_type(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::{prop, prop_assert, prop_assert_eq, proptest};
    use proptest::strategy::Strategy as _;

    fn html_doc(url: &str, body: &str) -> Document {
        Document::new(Url::parse(url).unwrap())
            .with_header("content-type", "text/html")
            .with_body(body)
    }

    fn urls(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.url.as_str()).collect()
    }

    const PAGE: &str = r#"<html><head>
        <link rel="alternate" type="application/rss+xml" href="/rss.xml">
        <link rel="alternate stylesheet" type="application/rss+xml" href="/style-bogus.xml">
        <link rel="alternate" type="text/html" href="/other-language.html">
        <link rel="feed" href="/hfeed">
    </head><body>
        <a href="/archive.atom">Archive</a>
        <a href="/subscribe">Subscribe via RSS</a>
        <a href="/about">About</a>
        <a href="http://feeds.example.org/site.rdf">Mirror</a>
        <a href="http://other.example.org/syndication">Atom feed</a>
        <a href="javascript:void(0)">RSS</a>
        <a href="/rss.xml">Same as the alternate link</a>
    </body></html>"#;

    #[test]
    fn test_extract_all_in_strategy_order() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc("http://example.com/", PAGE);
        let candidates = extractor.extract(&doc, DiscoveryPolicy::ALL);

        assert_eq!(
            urls(&candidates),
            vec![
                "http://example.com/rss.xml",
                "http://example.com/hfeed",
                "http://example.com/archive.atom",
                "http://example.com/subscribe",
                "http://feeds.example.org/site.rdf",
                "http://other.example.org/syndication",
            ]
        );
        let sources: Vec<_> = candidates.iter().map(|c| c.source).collect();
        assert_eq!(
            sources,
            vec![
                Strategy::Autodiscovery,
                Strategy::Autodiscovery,
                Strategy::LocalExtension,
                Strategy::LocalBody,
                Strategy::RemoteExtension,
                Strategy::RemoteBody,
            ]
        );
        let ranks: Vec<_> = candidates.iter().map(|c| c.discovery_rank).collect();
        assert_eq!(ranks, vec![0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_policy_selects_strategies() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc("http://example.com/", PAGE);

        let remote = extractor.extract(&doc, DiscoveryPolicy::REMOTE_EXTENSION);
        assert_eq!(urls(&remote), vec!["http://feeds.example.org/site.rdf"]);

        assert!(extractor.extract(&doc, DiscoveryPolicy::NONE).is_empty());
    }

    #[test]
    fn test_duplicate_keeps_first_strategy() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc("http://example.com/", PAGE);

        let local_only = extractor.extract(&doc, DiscoveryPolicy::LOCAL_EXTENSION);
        assert_eq!(
            urls(&local_only),
            vec!["http://example.com/archive.atom", "http://example.com/rss.xml"]
        );

        let all = extractor.extract(&doc, DiscoveryPolicy::ALL);
        let rss = all
            .iter()
            .find(|c| c.url.as_str() == "http://example.com/rss.xml")
            .unwrap();
        assert_eq!(rss.source, Strategy::Autodiscovery);
    }

    #[test]
    fn test_base_href_is_respected() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc(
            "http://example.com/page/",
            r#"<html><head><base href="/blog/">
            <link rel="alternate" type="application/atom+xml" href="atom.xml"></head></html>"#,
        );
        let candidates = extractor.extract(&doc, DiscoveryPolicy::AUTODISCOVERY);
        assert_eq!(urls(&candidates), vec!["http://example.com/blog/atom.xml"]);
    }

    #[test]
    fn test_feed_scheme_is_rewritten() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc(
            "https://example.com/",
            r#"<link rel="alternate" type="application/rss+xml" href="feed://example.com/rss">"#,
        );
        let candidates = extractor.extract(&doc, DiscoveryPolicy::AUTODISCOVERY);
        assert_eq!(urls(&candidates), vec!["http://example.com/rss"]);
    }

    #[test]
    fn test_malformed_markup_degrades() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc(
            "http://example.com/",
            r#"<html><body><div><a href="/feed.rss">x</a><p><<<>>><link rel=alternate type=application/atom+xml href=/atom"#,
        );
        let candidates = extractor.extract(&doc, DiscoveryPolicy::ALL);
        assert!(urls(&candidates).contains(&"http://example.com/feed.rss"));

        let garbage = Document::new(Url::parse("http://example.com/").unwrap())
            .with_body(vec![0xff, 0x00, 0xfe, 0x12]);
        assert!(extractor.extract(&garbage, DiscoveryPolicy::ALL).is_empty());
    }

    #[test]
    fn test_port_distinguishes_local_and_remote() {
        let extractor = CandidateExtractor::default();
        let doc = html_doc(
            "http://example.com/",
            r#"<a href="http://example.com:8080/rss.xml">x</a>"#,
        );
        assert!(extractor
            .extract(&doc, DiscoveryPolicy::LOCAL_EXTENSION)
            .is_empty());
        assert_eq!(
            extractor
                .extract(&doc, DiscoveryPolicy::REMOTE_EXTENSION)
                .len(),
            1
        );
    }

    #[test]
    fn test_heuristics_helpers() {
        let h = Heuristics::default();
        assert!(h.has_feed_extension(&Url::parse("http://e.com/a/index.RSS").unwrap()));
        assert!(!h.has_feed_extension(&Url::parse("http://e.com/xml/index").unwrap()));
        assert!(h.mentions_keyword("Subscribe to our ATOM feed"));
        assert!(!h.mentions_keyword("About us"));
        assert_eq!(h.rejected_marker("http://e.com/BOGUS/rss"), Some("bogus"));
        assert_eq!(h.rejected_marker("http://e.com/rss"), None);
    }

    fn fragment() -> impl proptest::strategy::Strategy<Value = String> {
        prop::sample::select(vec![
            r#"<link rel="alternate" type="application/rss+xml" href="/a.xml">"#,
            r#"<a href="/b.rss">b</a>"#,
            r#"<a href="http://remote.example.org/c">rss</a>"#,
            r#"<a href="/d">feed</a>"#,
            r#"<base href="/sub/">"#,
            "<p>text</p>",
            "<<broken",
            r#"<a href="mailto:x@y">rss</a>"#,
        ])
        .prop_map(str::to_owned)
    }

    proptest! {
        #[test]
        fn prop_extraction_is_restartable(parts in prop::collection::vec(fragment(), 0..12), bits in 0u32..64) {
            let extractor = CandidateExtractor::default();
            let doc = html_doc("http://example.com/page", &parts.concat());
            let policy = DiscoveryPolicy::from_bits(bits);

            let first = extractor.extract(&doc, policy);
            let second = extractor.extract(&doc, policy);
            prop_assert_eq!(&first, &second);

            for c in &first {
                prop_assert!(matches!(c.url.scheme(), "http" | "https"));
                prop_assert!(policy.contains(c.source.bit()));
            }
        }
    }
}
