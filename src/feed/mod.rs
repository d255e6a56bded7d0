//! Feed location: deciding which URL actually serves the feed for a page.
//!
//! - **Documents**: [`Document`] is what a [`Fetch`] implementation returns
//! - **Classification**: [`Classifier`] answers "is this a feed?"
//! - **Extraction**: [`CandidateExtractor`] finds feed references in HTML
//! - **Verification**: [`Verifier`] fetches and classifies one candidate
//! - **Discovery**: [`Locator`] runs the whole search under a [`DiscoveryPolicy`]
//! - **Loading**: [`FeedLoader`] adds caching on top of discovery
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use feedscout::feed::{Document, DiscoveryPolicy, Locator, SniffingClassifier, StaticFile};
//! use url::Url;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let feed = Document::new(Url::parse("http://example.com/rss.xml").unwrap())
//!     .with_header("content-type", "application/rss+xml")
//!     .with_body("<rss/>");
//! let page = Document::new(Url::parse("http://example.com/").unwrap())
//!     .with_header("content-type", "text/html")
//!     .with_body(r#"<link rel="alternate" type="application/rss+xml" href="/rss.xml">"#);
//!
//! let file = Arc::new(StaticFile::new().with_document(feed));
//! let locator = Locator::new(file, Arc::new(SniffingClassifier));
//!
//! let found = locator.find(&page, DiscoveryPolicy::ALL).await.unwrap().unwrap();
//! assert_eq!(found.url().as_str(), "http://example.com/rss.xml");
//! # }
//! ```

mod classifier;
mod document;
mod extractor;
mod fetcher;
mod loader;
mod locator;
mod policy;
mod static_file;
mod summary;
mod verifier;

pub use classifier::{sniff, Classifier, Sniffed, SniffingClassifier, FEED_MIME_TYPES};
pub use document::{Document, VerifiedFeed};
pub use extractor::{Candidate, CandidateExtractor, Heuristics};
pub use fetcher::{Fetch, FetchError, HttpFile, HttpSettings};
pub use loader::{FeedLoader, LoadError, LoadSettings, LoadSource, LoadedFeed};
pub use locator::{
    Discover, LocateError, Locator, LocatorBuilder, LocatorFactory, DEFAULT_MAX_CHECKED,
};
pub use policy::{DiscoveryPolicy, Strategy, UnknownStrategy};
pub use static_file::StaticFile;
pub use summary::{FeedSummary, SummaryError};
pub use verifier::{Rejection, Verifier};
