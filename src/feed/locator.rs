//! Feed autodiscovery.
//!
//! A discovery run moves through a fixed sequence of states:
//!
//! 1. **Self-check** - a non-2xx source is a structural failure; a source
//!    that is already a feed is the result and nothing is parsed or fetched.
//! 2. **Extracting** - the source is scanned for candidates under the policy.
//! 3. **Verifying** - candidates are fetched and classified one at a time, in
//!    extraction order; `find` stops at the first feed.
//! 4. **Found** or **Exhausted** - running out of candidates is an empty
//!    result, never an error.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::classifier::{sniff, Classifier, Sniffed};
use super::document::{Document, VerifiedFeed};
use super::extractor::{Candidate, CandidateExtractor, Heuristics};
use super::fetcher::Fetch;
use super::policy::DiscoveryPolicy;
use super::verifier::Verifier;

/// Default cap on candidate fetches per discovery run.
pub const DEFAULT_MAX_CHECKED: usize = 10;

/// Hard failures of a discovery run. Absence is not one of them.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The source document is not a readable representation of its URL
    #[error("source document {url} is unreadable (HTTP {status})")]
    UnreadableSource { url: Url, status: u16 },
}

/// The Locator role.
#[async_trait]
pub trait Discover: Send + Sync {
    /// Pure classification of the source document.
    fn is_feed(&self, document: &Document) -> bool;

    /// Returns the first verified feed for `document`, or `None`.
    async fn find(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
    ) -> Result<Option<VerifiedFeed>, LocateError>;

    /// Returns every verified feed, in verification order.
    async fn find_all(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
    ) -> Result<Vec<VerifiedFeed>, LocateError>;
}

/// Builds a [`Discover`] implementation around resolved collaborators.
///
/// This is what the registry stores for the Locator role: the File and
/// Classifier a locator uses are only known once those roles are resolved.
pub trait LocatorFactory: Send + Sync {
    fn build(&self, file: Arc<dyn Fetch>, classifier: Arc<dyn Classifier>) -> Arc<dyn Discover>;
}

/// Default [`LocatorFactory`], producing [`Locator`]s.
#[derive(Debug, Clone)]
pub struct LocatorBuilder {
    pub heuristics: Heuristics,
    pub max_checked: usize,
}

impl Default for LocatorBuilder {
    fn default() -> Self {
        Self {
            heuristics: Heuristics::default(),
            max_checked: DEFAULT_MAX_CHECKED,
        }
    }
}

impl LocatorFactory for LocatorBuilder {
    fn build(&self, file: Arc<dyn Fetch>, classifier: Arc<dyn Classifier>) -> Arc<dyn Discover> {
        Arc::new(
            Locator::new(file, classifier)
                .with_heuristics(self.heuristics.clone())
                .with_max_checked(self.max_checked),
        )
    }
}

/// Default feed locator.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use feedscout::feed::{DiscoveryPolicy, HttpFile, Locator, SniffingClassifier, Fetch};
/// use url::Url;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let file = Arc::new(HttpFile::default());
/// let locator = Locator::new(file.clone(), Arc::new(SniffingClassifier));
///
/// let page = file.fetch(&Url::parse("https://example.com/")?).await?;
/// if let Some(feed) = locator.find(&page, DiscoveryPolicy::ALL).await? {
///     println!("feed at {}", feed.url());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Locator {
    classifier: Arc<dyn Classifier>,
    extractor: CandidateExtractor,
    verifier: Verifier,
    max_checked: usize,
}

impl Locator {
    pub fn new(file: Arc<dyn Fetch>, classifier: Arc<dyn Classifier>) -> Self {
        let heuristics = Heuristics::default();
        Self {
            verifier: Verifier::new(file, classifier.clone(), heuristics.clone()),
            extractor: CandidateExtractor::new(heuristics),
            classifier,
            max_checked: DEFAULT_MAX_CHECKED,
        }
    }

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.verifier = self.verifier.with_heuristics(heuristics.clone());
        self.extractor = CandidateExtractor::new(heuristics);
        self
    }

    /// Caps the number of candidate fetches per run. Zero disables verification.
    pub fn with_max_checked(mut self, max_checked: usize) -> Self {
        self.max_checked = max_checked;
        self
    }

    pub fn is_feed(&self, document: &Document) -> bool {
        self.classifier
            .looks_like_feed(document.content_type(), document.body())
    }

    pub async fn find(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
    ) -> Result<Option<VerifiedFeed>, LocateError> {
        let mut found = self.run(document, policy, true).await?;
        Ok(found.pop())
    }

    pub async fn find_all(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
    ) -> Result<Vec<VerifiedFeed>, LocateError> {
        self.run(document, policy, false).await
    }

    async fn run(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
        first_only: bool,
    ) -> Result<Vec<VerifiedFeed>, LocateError> {
        let url = document.url();

        // An error body is never the resource, whatever its content type
        if !document.is_success() {
            return Err(LocateError::UnreadableSource {
                url: url.clone(),
                status: document.status(),
            });
        }

        if self.is_feed(document) {
            tracing::debug!(url = %url, "Source document is a feed");
            return Ok(vec![VerifiedFeed::new(document.clone())]);
        }

        // Only HTML is ever handed to the parser
        match sniff(document.content_type(), document.body()) {
            Sniffed::Html => {}
            other => {
                tracing::debug!(url = %url, sniffed = ?other, "Source is neither feed nor HTML");
                return Ok(Vec::new());
            }
        }

        if policy.is_none() {
            tracing::debug!(url = %url, "Discovery policy selects no strategies");
            return Ok(Vec::new());
        }

        let candidates = self.extractor.extract(document, policy);
        if candidates.is_empty() {
            tracing::debug!(url = %url, "No feed candidates found");
            return Ok(Vec::new());
        }

        self.verify_all(url, candidates, first_only).await
    }

    async fn verify_all(
        &self,
        url: &Url,
        candidates: Vec<Candidate>,
        first_only: bool,
    ) -> Result<Vec<VerifiedFeed>, LocateError> {
        let mut found = Vec::new();
        let mut checked = 0;

        for candidate in &candidates {
            if self.verifier.precheck(candidate).is_ok() && checked >= self.max_checked {
                tracing::debug!(
                    url = %url,
                    max_checked = self.max_checked,
                    "Candidate fetch limit reached"
                );
                break;
            }

            match self.verifier.verify(candidate).await {
                Ok(feed) => {
                    checked += 1;
                    tracing::debug!(
                        url = %url,
                        feed = %feed.url(),
                        source = %candidate.source,
                        rank = candidate.discovery_rank,
                        "Verified feed candidate"
                    );
                    found.push(feed);
                    if first_only {
                        return Ok(found);
                    }
                }
                Err(rejection) => {
                    if rejection.fetched() {
                        checked += 1;
                    }
                    tracing::debug!(
                        candidate = %candidate.url,
                        source = %candidate.source,
                        reason = %rejection,
                        "Rejected feed candidate"
                    );
                }
            }
        }

        if found.is_empty() {
            tracing::debug!(url = %url, checked, "Feed candidates exhausted");
        }
        Ok(found)
    }
}

#[async_trait]
impl Discover for Locator {
    fn is_feed(&self, document: &Document) -> bool {
        Locator::is_feed(self, document)
    }

    async fn find(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
    ) -> Result<Option<VerifiedFeed>, LocateError> {
        Locator::find(self, document, policy).await
    }

    async fn find_all(
        &self,
        document: &Document,
        policy: DiscoveryPolicy,
    ) -> Result<Vec<VerifiedFeed>, LocateError> {
        Locator::find_all(self, document, policy).await
    }
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("extractor", &self.extractor)
            .field("max_checked", &self.max_checked)
            .finish_non_exhaustive()
    }
}
