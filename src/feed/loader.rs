//! The top-level feed load: cache lookup, fetch, discovery, store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::document::{Document, VerifiedFeed};
use super::fetcher::{Fetch, FetchError};
use super::locator::{Discover, LocateError};
use super::policy::DiscoveryPolicy;
use crate::cache::{
    CacheBackend, CacheError, CacheKey, CacheMetadata, CacheResolver, CachedEntry, Freshness,
    DEFAULT_EXTENSION,
};
use crate::registry::{Registry, RegistryError, UsageError};
use crate::util::normalize_url;

const NOT_MODIFIED: u16 = 304;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Usage(UsageError),
    #[error(transparent)]
    Cache(CacheError),
}

impl From<CacheError> for LoadError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Usage(usage) => LoadError::Usage(usage),
            other => LoadError::Cache(other),
        }
    }
}

impl LoadError {
    /// Failures a stale cached copy may stand in for.
    fn is_transient(&self) -> bool {
        matches!(self, LoadError::Fetch(_) | LoadError::Locate(_))
    }
}

/// Where a loaded feed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// Served from a fresh cache entry; no request made
    Cache,
    /// Cached body confirmed by a `304 Not Modified`
    Revalidated,
    /// Fetched (and possibly discovered) from the network
    Network,
    /// The refresh failed; an expired cache entry was served instead
    StaleFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFeed {
    pub requested_url: Url,
    pub feed_url: String,
    pub body: Vec<u8>,
    pub metadata: CacheMetadata,
    pub source: LoadSource,
}

impl LoadedFeed {
    fn from_entry(requested_url: Url, entry: CachedEntry, source: LoadSource) -> Self {
        Self {
            requested_url,
            feed_url: entry.metadata.feed_url.clone(),
            body: entry.body,
            metadata: entry.metadata,
            source,
        }
    }
}

/// Knobs for [`FeedLoader`].
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub policy: DiscoveryPolicy,
    pub use_cache: bool,
    pub cache_location: String,
    pub cache_extension: String,
    /// Max-age for responses without `Cache-Control: max-age`
    pub default_max_age: Option<Duration>,
    /// Accept the fetched document as the feed without classifying it
    pub force_feed: bool,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            policy: DiscoveryPolicy::ALL,
            use_cache: true,
            cache_location: "cache".to_owned(),
            cache_extension: DEFAULT_EXTENSION.to_owned(),
            default_max_age: Some(Duration::from_secs(3600)),
            force_feed: false,
        }
    }
}

/// Loads the feed behind a URL using the collaborators in a [`Registry`].
///
/// # Flow
///
/// 1. Resolve a cache backend for the normalized URL
/// 2. Fresh entry: return it; expired entry with validators: revalidate,
///    rediscovering from the requested URL if the stored feed URL has died
/// 3. Otherwise fetch the URL and run discovery on the result
/// 4. Store the located feed; on a failed refresh fall back to the stale entry
#[derive(Debug, Clone)]
pub struct FeedLoader {
    registry: Arc<Registry>,
    settings: LoadSettings,
}

impl FeedLoader {
    pub fn new(registry: Arc<Registry>, settings: LoadSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    /// Loads the feed for `input`. `Ok(None)` means no feed could be found.
    ///
    /// # Errors
    ///
    /// - [`LoadError::InvalidUrl`] if `input` is not an absolute URL
    /// - [`LoadError::Registry`] / [`LoadError::Usage`] if a registered
    ///   implementation is unsuitable
    /// - [`LoadError::Fetch`] / [`LoadError::Locate`] if the source cannot be
    ///   read and there is no cached copy to fall back on
    pub async fn load(&self, input: &str) -> Result<Option<LoadedFeed>, LoadError> {
        let url = parse_input(input)?;
        let file = self.registry.file()?;
        let backend = self.backend_for(&url)?;
        let now = Utc::now();

        let cached = match &backend {
            Some(backend) => load_cached(backend.as_ref()).await,
            None => None,
        };

        let fetched = match cached
            .as_ref()
            .map(|entry| (entry, entry.metadata.freshness(now)))
        {
            Some((entry, Freshness::Fresh)) => {
                tracing::debug!(url = %url, "Serving fresh cache entry");
                return Ok(Some(LoadedFeed::from_entry(
                    url,
                    entry.clone(),
                    LoadSource::Cache,
                )));
            }
            Some((entry, Freshness::Revalidate)) => {
                self.revalidate(file.as_ref(), &url, entry).await?
            }
            _ => file.fetch(&url).await,
        };

        if let (Ok(document), Some(entry)) = (&fetched, &cached) {
            if document.status() == NOT_MODIFIED {
                touch(backend.as_deref(), now).await;
                let mut entry = entry.clone();
                entry.metadata.stored_at = now;
                return Ok(Some(LoadedFeed::from_entry(
                    url,
                    entry,
                    LoadSource::Revalidated,
                )));
            }
        }

        let outcome = match fetched {
            Ok(document) => self.locate(file, document).await,
            Err(e) => Err(e.into()),
        };

        match (outcome, cached) {
            (Ok(Some(feed)), _) => {
                let metadata =
                    CacheMetadata::from_document(feed.document(), self.settings.default_max_age, now);
                let entry = CachedEntry {
                    body: feed.into_document().into_body(),
                    metadata,
                };
                if let Some(backend) = &backend {
                    if let Err(e) = backend.write(entry.clone()).await {
                        tracing::warn!(key = %backend.key(), error = %e, "Failed to store feed in cache");
                    }
                }
                Ok(Some(LoadedFeed::from_entry(url, entry, LoadSource::Network)))
            }
            (Ok(None), _) => Ok(None),
            (Err(e), Some(entry)) if e.is_transient() => {
                tracing::warn!(url = %url, error = %e, "Refresh failed, serving stale cache entry");
                touch(backend.as_deref(), now).await;
                Ok(Some(LoadedFeed::from_entry(
                    url,
                    entry,
                    LoadSource::StaleFallback,
                )))
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Fetches `input` and returns every feed discovery verifies. Bypasses the cache.
    ///
    /// # Errors
    ///
    /// Same as [`FeedLoader::load`], without the stale fallback.
    pub async fn discover_all(&self, input: &str) -> Result<Vec<VerifiedFeed>, LoadError> {
        let url = parse_input(input)?;
        let file = self.registry.file()?;
        let document = file.fetch(&url).await?;
        let locator = self.locator(file)?;
        Ok(locator.find_all(&document, self.settings.policy).await?)
    }

    /// Conditional fetch of the stored feed URL.
    ///
    /// A discovered feed URL that no longer serves a feed sends the load back
    /// to the requested URL, so a moved feed is found again.
    async fn revalidate(
        &self,
        file: &dyn Fetch,
        url: &Url,
        entry: &CachedEntry,
    ) -> Result<Result<Document, FetchError>, LoadError> {
        let feed_url = match Url::parse(&entry.metadata.feed_url) {
            Ok(feed_url) => feed_url,
            Err(_) => return Ok(file.fetch(url).await),
        };

        tracing::debug!(url = %url, feed = %feed_url, "Revalidating cache entry");
        let refreshed = file
            .fetch_conditional(&feed_url, &entry.metadata.validators())
            .await;
        if feed_url == *url {
            return Ok(refreshed);
        }

        let usable = match &refreshed {
            Ok(document) if document.status() == NOT_MODIFIED => true,
            Ok(document) if document.is_success() => {
                self.settings.force_feed
                    || self
                        .registry
                        .classifier()?
                        .looks_like_feed(document.content_type(), document.body())
            }
            _ => false,
        };
        if usable {
            return Ok(refreshed);
        }

        tracing::info!(
            url = %url,
            feed = %feed_url,
            "Stored feed URL no longer serves a feed, rediscovering"
        );
        Ok(file.fetch(url).await)
    }

    fn backend_for(&self, url: &Url) -> Result<Option<Arc<dyn CacheBackend>>, LoadError> {
        if !self.settings.use_cache {
            return Ok(None);
        }
        let resolver = CacheResolver::new(self.registry.cache()?);
        let key = CacheKey::for_url(
            &self.settings.cache_location,
            url,
            &self.settings.cache_extension,
        );
        Ok(Some(resolver.resolve_backend(&key)?.backend))
    }

    fn locator(&self, file: Arc<dyn Fetch>) -> Result<Arc<dyn Discover>, LoadError> {
        let classifier = self.registry.classifier()?;
        Ok(self.registry.locator()?.build(file, classifier))
    }

    async fn locate(
        &self,
        file: Arc<dyn Fetch>,
        document: Document,
    ) -> Result<Option<VerifiedFeed>, LoadError> {
        if self.settings.force_feed {
            if !document.is_success() {
                return Err(LocateError::UnreadableSource {
                    url: document.url().clone(),
                    status: document.status(),
                }
                .into());
            }
            return Ok(Some(VerifiedFeed::new(document)));
        }

        let locator = self.locator(file)?;
        Ok(locator.find(&document, self.settings.policy).await?)
    }
}

fn parse_input(input: &str) -> Result<Url, LoadError> {
    normalize_url(input).map_err(|e| LoadError::InvalidUrl(format!("{input}: {e}")))
}

async fn load_cached(backend: &dyn CacheBackend) -> Option<CachedEntry> {
    match backend.load().await {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(key = %backend.key(), error = %e, "Failed to read cache entry");
            None
        }
    }
}

async fn touch(backend: Option<&dyn CacheBackend>, now: chrono::DateTime<Utc>) {
    if let Some(backend) = backend {
        if let Err(e) = backend.touch(now).await {
            tracing::warn!(key = %backend.key(), error = %e, "Failed to touch cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheImplementation, MemoryCache};
    use crate::feed::StaticFile;
    use crate::registry::{Implementation, Role};

    fn registry_with(file: Arc<StaticFile>, cache: MemoryCache) -> Arc<Registry> {
        let registry = Registry::new();
        registry.register(Role::File, Implementation::File(file));
        registry.register(Role::Cache, Implementation::Cache(Arc::new(cache)));
        Arc::new(registry)
    }

    fn page() -> Document {
        Document::new(Url::parse("http://example.com/").unwrap())
            .with_header("content-type", "text/html")
            .with_body(r#"<link rel="alternate" type="application/rss+xml" href="/rss.xml">"#)
    }

    fn feed() -> Document {
        Document::new(Url::parse("http://example.com/rss.xml").unwrap())
            .with_header("content-type", "application/rss+xml")
            .with_body("<rss version=\"2.0\"><channel/></rss>")
    }

    #[tokio::test]
    async fn test_load_discovers_then_serves_from_cache() {
        let file = Arc::new(StaticFile::new().with_document(page()).with_document(feed()));
        let loader = FeedLoader::new(
            registry_with(file.clone(), MemoryCache::default()),
            LoadSettings::default(),
        );

        let first = loader.load("http://example.com/").await.unwrap().unwrap();
        assert_eq!(first.source, LoadSource::Network);
        assert_eq!(first.feed_url, "http://example.com/rss.xml");
        assert_eq!(file.requests().len(), 2);

        let second = loader.load("http://example.com/#top").await.unwrap().unwrap();
        assert_eq!(second.source, LoadSource::Cache);
        assert_eq!(second.body, first.body);
        assert_eq!(file.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_no_feed_is_absence_and_not_cached() {
        let file = Arc::new(StaticFile::new().with_document(
            Document::new(Url::parse("http://example.com/").unwrap())
                .with_header("content-type", "text/html")
                .with_body("<p>nothing here</p>"),
        ));
        let cache = MemoryCache::default();
        let loader = FeedLoader::new(registry_with(file, cache.clone()), LoadSettings::default());

        assert!(loader.load("http://example.com/").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    fn expiring(doc: Document) -> Document {
        doc.with_header("cache-control", "no-cache")
            .with_header("etag", "\"v1\"")
    }

    #[tokio::test]
    async fn test_error_response_falls_back_to_cached_feed() {
        let url = Url::parse("http://example.com/feed.xml").unwrap();
        let good = Document::new(url.clone())
            .with_header("content-type", "application/rss+xml")
            .with_header("cache-control", "no-store")
            .with_body("<rss version=\"2.0\"><channel/></rss>");
        let file = Arc::new(StaticFile::new().with_document(good.clone()));
        let loader = FeedLoader::new(
            registry_with(file.clone(), MemoryCache::default()),
            LoadSettings::default(),
        );

        let first = loader.load(url.as_str()).await.unwrap().unwrap();
        assert_eq!(first.source, LoadSource::Network);

        file.insert(
            Document::new(url.clone())
                .with_status(503)
                .with_header("content-type", "application/xml")
                .with_body("<Error><Code>SlowDown</Code></Error>"),
        );
        for _ in 0..2 {
            let loaded = loader.load(url.as_str()).await.unwrap().unwrap();
            assert_eq!(loaded.source, LoadSource::StaleFallback);
            assert_eq!(loaded.body, good.body());
        }
    }

    #[tokio::test]
    async fn test_dead_feed_url_is_rediscovered() {
        let home = Url::parse("http://example.com/").unwrap();
        let old = Url::parse("http://example.com/old.xml").unwrap();
        let new = Url::parse("http://example.com/new.xml").unwrap();
        let linking = |href: &str| {
            Document::new(home.clone())
                .with_header("content-type", "text/html")
                .with_body(format!(
                    r#"<link rel="alternate" type="application/rss+xml" href="{href}">"#
                ))
        };
        let feed_at = |at: &Url| {
            expiring(
                Document::new(at.clone())
                    .with_header("content-type", "application/rss+xml")
                    .with_body("<rss version=\"2.0\"><channel/></rss>"),
            )
        };

        let file = Arc::new(
            StaticFile::new()
                .with_document(linking("/old.xml"))
                .with_document(feed_at(&old)),
        );
        let loader = FeedLoader::new(
            registry_with(file.clone(), MemoryCache::default()),
            LoadSettings::default(),
        );

        let first = loader.load(home.as_str()).await.unwrap().unwrap();
        assert_eq!(first.feed_url, old.as_str());

        file.insert(Document::new(old.clone()).with_status(410));
        file.insert(linking("/new.xml"));
        file.insert(feed_at(&new));

        let second = loader.load(home.as_str()).await.unwrap().unwrap();
        assert_eq!(second.source, LoadSource::Network);
        assert_eq!(second.feed_url, new.as_str());
        assert_eq!(
            file.requests(),
            vec![home.clone(), old.clone(), old.clone(), home.clone(), new.clone()]
        );

        let third = loader.load(home.as_str()).await.unwrap().unwrap();
        assert_eq!(third.source, LoadSource::Network);
        assert_eq!(file.requests().last(), Some(&new));
    }

    #[tokio::test]
    async fn test_rediscovery_failure_serves_stale_entry() {
        let home = Url::parse("http://example.com/").unwrap();
        let file = Arc::new(
            StaticFile::new()
                .with_document(page())
                .with_document(expiring(feed())),
        );
        let loader = FeedLoader::new(
            registry_with(file.clone(), MemoryCache::default()),
            LoadSettings::default(),
        );
        let first = loader.load(home.as_str()).await.unwrap().unwrap();

        file.insert(Document::new(feed().url().clone()).with_status(404));
        file.insert(Document::new(home.clone()).with_status(500));

        let second = loader.load(home.as_str()).await.unwrap().unwrap();
        assert_eq!(second.source, LoadSource::StaleFallback);
        assert_eq!(second.feed_url, first.feed_url);
        assert_eq!(second.body, first.body);
    }

    #[tokio::test]
    async fn test_force_feed_skips_discovery() {
        let file = Arc::new(StaticFile::new().with_document(page()));
        let loader = FeedLoader::new(
            registry_with(file.clone(), MemoryCache::default()),
            LoadSettings {
                force_feed: true,
                use_cache: false,
                ..LoadSettings::default()
            },
        );

        let loaded = loader.load("http://example.com/").await.unwrap().unwrap();
        assert_eq!(loaded.feed_url, "http://example.com/");
        assert_eq!(file.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_cache_is_usage_error() {
        struct Inert;
        impl CacheImplementation for Inert {
            fn name(&self) -> &str {
                "inert"
            }
        }

        let registry = Registry::new();
        registry.register(Role::Cache, Implementation::Cache(Arc::new(Inert)));
        let loader = FeedLoader::new(Arc::new(registry), LoadSettings::default());

        let err = loader.load("http://example.com/").await.unwrap_err();
        assert!(matches!(err, LoadError::Usage(UsageError::UnsupportedConvention(_))));
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let loader = FeedLoader::new(Arc::new(Registry::new()), LoadSettings::default());
        assert!(matches!(
            loader.load("not a url").await,
            Err(LoadError::InvalidUrl(_))
        ));
    }
}
