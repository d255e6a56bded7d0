use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use url::Url;

use super::document::Document;
use super::fetcher::{Fetch, FetchError};

/// A File implementation that serves documents from memory.
///
/// Every request is recorded, including requests for unknown URLs, so callers
/// can assert exactly which URLs a discovery run touched.
#[derive(Debug, Default)]
pub struct StaticFile {
    documents: Mutex<HashMap<Url, Document>>,
    requests: Mutex<Vec<Url>>,
}

impl StaticFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`StaticFile::insert`].
    pub fn with_document(self, document: Document) -> Self {
        self.insert(document);
        self
    }

    /// Serves `document` for its own URL, replacing any previous one.
    pub fn insert(&self, document: Document) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.url().clone(), document);
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<Url> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Fetch for StaticFile {
    async fn fetch(&self, url: &Url) -> Result<Document, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());

        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Transport(format!("no document for {url}")))
    }
}
