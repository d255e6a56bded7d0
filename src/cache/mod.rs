//! Persistent feed cache.
//!
//! A cache implementation is registered under the Cache role and turned into a
//! per-key [`CacheBackend`] by the [`CacheResolver`]. Implementations follow
//! one (or both) of two conventions:
//!
//! - [`CacheFactory`]: a shared handle that hands out backends for keys
//! - [`CacheConstructor`]: builds a standalone backend directly from a key
//!
//! [`CacheImplementation`] exposes which conventions an implementation
//! supports through explicit capability probes; nothing is discovered by
//! calling and failing.

mod memory;
mod resolver;
mod sqlite;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CACHE_CONTROL, ETAG, LAST_MODIFIED};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::feed::Document;
use crate::registry::UsageError;

pub use memory::MemoryCache;
pub use resolver::{probe, CacheResolver, Convention, ResolvedBackend};
pub use sqlite::SqliteCache;

/// Default storage-format tag for cache keys.
pub const DEFAULT_EXTENSION: &str = "spc";

/// Errors raised while resolving or using a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache storage error: {0}")]
    Storage(String),
}

/// Identifies one cache entry. Equal keys resolve to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub location: String,
    pub name: String,
    pub extension: String,
}

impl CacheKey {
    pub fn new(
        location: impl Into<String>,
        name: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
            extension: extension.into(),
        }
    }

    /// Key for a requested feed URL: the name is the SHA-256 hex digest of
    /// the normalized URL.
    pub fn for_url(location: &str, url: &Url, extension: &str) -> Self {
        let digest = Sha256::digest(url.as_str().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self::new(location, name, extension)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.location, self.name, self.extension)
    }
}

/// Validators for a conditional request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Whether a cached entry may be served as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within its max-age; serve without a request
    Fresh,
    /// Expired but carries validators; revalidate with a conditional request
    Revalidate,
    /// Expired with nothing to revalidate against; refetch
    Stale,
}

/// What the cache knows about a stored feed, besides its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    /// URL of the feed the entry was located at (may differ from the requested URL)
    pub feed_url: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub max_age: Option<Duration>,
    pub stored_at: DateTime<Utc>,
}

impl CacheMetadata {
    /// Reads validators and max-age from a fetched feed document.
    ///
    /// `Cache-Control: max-age` wins over `default_max_age`; `no-cache` and
    /// `no-store` force a zero max-age.
    pub fn from_document(
        document: &Document,
        default_max_age: Option<Duration>,
        stored_at: DateTime<Utc>,
    ) -> Self {
        let last_modified = document
            .header(LAST_MODIFIED.as_str())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.with_timezone(&Utc));

        Self {
            feed_url: document.url().to_string(),
            etag: document.header(ETAG.as_str()).map(str::to_owned),
            last_modified,
            max_age: document
                .header(CACHE_CONTROL.as_str())
                .and_then(parse_max_age)
                .or(default_max_age),
            stored_at,
        }
    }

    /// Freshness at `now`.
    ///
    /// Fresh iff a max-age is present and the entry is younger than it.
    /// Otherwise the entry needs revalidation if it has validators, and a full
    /// refetch if it has none.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        if let Some(max_age) = self.max_age {
            // Clock skew can make stored_at lie in the future
            let age = (now - self.stored_at).to_std().unwrap_or(Duration::ZERO);
            if age < max_age {
                return Freshness::Fresh;
            }
        }

        if self.etag.is_some() || self.last_modified.is_some() {
            Freshness::Revalidate
        } else {
            Freshness::Stale
        }
    }

    pub fn validators(&self) -> Validators {
        Validators {
            etag: self.etag.clone(),
            last_modified: self.last_modified,
        }
    }
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    let mut max_age = None;
    for directive in cache_control.split(',').map(str::trim) {
        let directive = directive.to_ascii_lowercase();
        if directive == "no-cache" || directive == "no-store" {
            return Some(Duration::ZERO);
        }
        if let Some(secs) = directive.strip_prefix("max-age=") {
            max_age = secs.trim_matches('"').parse().ok().map(Duration::from_secs);
        }
    }
    max_age
}

/// A stored feed body together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub body: Vec<u8>,
    pub metadata: CacheMetadata,
}

/// Storage for a single cache key.
///
/// `load` returns body and metadata from one consistent snapshot; `read` and
/// `metadata` are views of it, so a reader never sees one write's body with
/// another write's metadata.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn key(&self) -> &CacheKey;

    async fn load(&self) -> Result<Option<CachedEntry>, CacheError>;

    /// Replaces the entry.
    async fn write(&self, entry: CachedEntry) -> Result<(), CacheError>;

    /// Moves `stored_at` forward without rewriting the body. Returns false if
    /// there was no entry to touch.
    async fn touch(&self, stored_at: DateTime<Utc>) -> Result<bool, CacheError>;

    async fn remove(&self) -> Result<(), CacheError>;

    async fn read(&self) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.load().await?.map(|entry| entry.body))
    }

    async fn metadata(&self) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self.load().await?.map(|entry| entry.metadata))
    }
}

/// Factory convention: produce a backend for a key from a shared handle.
pub trait CacheFactory: Send + Sync {
    fn handler(&self, key: &CacheKey) -> Result<Arc<dyn CacheBackend>, CacheError>;
}

/// Constructor convention: build a standalone backend from a key.
pub trait CacheConstructor: Send + Sync {
    fn construct(&self, key: &CacheKey) -> Result<Arc<dyn CacheBackend>, CacheError>;
}

/// A cache implementation as registered under the Cache role.
///
/// The probes report which conventions the implementation supports. Both
/// default to unsupported.
pub trait CacheImplementation: Send + Sync {
    fn name(&self) -> &str;

    fn as_factory(&self) -> Option<&dyn CacheFactory> {
        None
    }

    fn as_constructor(&self) -> Option<&dyn CacheConstructor> {
        None
    }
}
