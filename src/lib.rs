//! Feed autodiscovery with a pluggable, freshness-aware cache.
//!
//! Given any URL, `feedscout` decides which URL actually serves its feed:
//! the document itself when it is a feed, otherwise a reference found in its
//! HTML and confirmed by fetching it. Collaborators (transport, cache,
//! locator, classifier) are looked up in a [`registry::Registry`] and can be
//! replaced by callers.
//!
//! - [`feed`] - documents, classification, discovery and the top-level load
//! - [`cache`] - cache keys, freshness, backends and their resolution
//! - [`registry`] - role to implementation table
//! - [`config`] - TOML configuration
//! - [`util`] - URL and text helpers

pub mod cache;
pub mod config;
pub mod feed;
pub mod registry;
pub mod util;

pub use feed::{DiscoveryPolicy, Document, FeedLoader, Locator, VerifiedFeed};
pub use registry::{Implementation, Registry, Role};
