//! Utility functions shared across discovery and caching.
//!
//! - **URL handling**: `feed:` scheme repair, reference resolution, origin checks
//! - **URL validation**: SSRF guard applied before fetching
//! - **Text**: control-character stripping for feed metadata
//!
//! # Examples
//!
//! ```
//! use feedscout::util::{resolve_reference, same_origin};
//! use url::Url;
//!
//! let base = Url::parse("http://example.com/blog/").unwrap();
//! let feed = resolve_reference("feed://example.com/rss.xml", &base).unwrap();
//! assert_eq!(feed.as_str(), "http://example.com/rss.xml");
//! assert!(same_origin(&base, &feed));
//! ```

mod links;
mod text;
mod url_validator;

pub use links::{fix_feed_scheme, normalize_url, resolve_reference, same_origin};
pub use text::strip_control_chars;
pub use url_validator::{validate_url, UrlValidationError};
