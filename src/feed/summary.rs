use serde::Serialize;
use thiserror::Error;

use crate::util::strip_control_chars;

/// The located content could not be parsed as RSS/Atom/JSON Feed.
#[derive(Debug, Error)]
#[error("feed could not be parsed: {0}")]
pub struct SummaryError(String);

/// Channel-level metadata of a located feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    /// Feed title (e.g., "Hacker News")
    pub title: String,
    /// URL of the RSS/Atom feed itself
    pub feed_url: String,
    /// URL of the associated website, if available
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub entries: usize,
}

impl FeedSummary {
    /// Parses feed bytes for their channel metadata.
    ///
    /// Feed text is attacker-controlled, so control characters are stripped
    /// from every string taken from it.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError`] if `feed-rs` cannot parse `bytes`.
    pub fn parse(bytes: &[u8], feed_url: &str) -> Result<Self, SummaryError> {
        let feed = feed_rs::parser::parse(bytes).map_err(|e| SummaryError(e.to_string()))?;

        let title = strip_control_chars(
            &feed
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled Feed".to_owned()),
        )
        .into_owned();

        let description = feed
            .description
            .map(|d| strip_control_chars(&d.content).into_owned());

        // The site is the first link that is not the feed itself
        let site_url = feed
            .links
            .iter()
            .find(|link| link.href != feed_url)
            .map(|link| strip_control_chars(&link.href).into_owned());

        Ok(Self {
            title,
            feed_url: feed_url.to_owned(),
            site_url,
            description,
            entries: feed.entries.len(),
        })
    }
}
