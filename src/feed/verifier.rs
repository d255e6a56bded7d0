use std::sync::Arc;

use thiserror::Error;

use super::classifier::Classifier;
use super::document::VerifiedFeed;
use super::extractor::{Candidate, Heuristics};
use super::fetcher::{Fetch, FetchError};

/// Why a candidate was not accepted. Never fatal to a discovery run.
#[derive(Debug, Error)]
pub enum Rejection {
    /// Matched a rejected marker; no request was made
    #[error("known-bad reference (matched `{marker}`)")]
    KnownBad { marker: String },
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("not a feed")]
    NotAFeed,
}

impl Rejection {
    /// Whether producing this rejection cost a network request.
    pub fn fetched(&self) -> bool {
        !matches!(self, Rejection::KnownBad { .. })
    }
}

/// Fetches a candidate and asks the classifier whether it is a feed.
#[derive(Clone)]
pub struct Verifier {
    file: Arc<dyn Fetch>,
    classifier: Arc<dyn Classifier>,
    heuristics: Heuristics,
}

impl Verifier {
    pub fn new(file: Arc<dyn Fetch>, classifier: Arc<dyn Classifier>, heuristics: Heuristics) -> Self {
        Self {
            file,
            classifier,
            heuristics,
        }
    }

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Local check against the rejected markers. Pure; performs no I/O.
    pub fn precheck(&self, candidate: &Candidate) -> Result<(), Rejection> {
        match self.heuristics.rejected_marker(candidate.url.as_str()) {
            Some(marker) => Err(Rejection::KnownBad {
                marker: marker.to_owned(),
            }),
            None => Ok(()),
        }
    }

    pub async fn verify(&self, candidate: &Candidate) -> Result<VerifiedFeed, Rejection> {
        self.precheck(candidate)?;

        let document = self.file.fetch(&candidate.url).await?;
        if !document.is_success() {
            return Err(Rejection::HttpStatus(document.status()));
        }
        if !self
            .classifier
            .looks_like_feed(document.content_type(), document.body())
        {
            return Err(Rejection::NotAFeed);
        }

        Ok(VerifiedFeed::new(document))
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("heuristics", &self.heuristics)
            .finish_non_exhaustive()
    }
}
