use url::Url;

/// Rewrites the `feed:` pseudo-scheme to HTTP.
///
/// Handles both `feed://host/path` and `feed:https://host/path`. Other input
/// is returned unchanged.
pub fn fix_feed_scheme(href: &str) -> String {
    let trimmed = href.trim();
    let Some(prefix) = trimmed.get(..5) else {
        return trimmed.to_owned();
    };
    if !prefix.eq_ignore_ascii_case("feed:") {
        return trimmed.to_owned();
    }

    let rest = &trimmed[5..];
    if rest.starts_with("//") {
        format!("http:{rest}")
    } else {
        rest.to_owned()
    }
}

/// Resolves a reference against `base`, keeping only absolute http(s) results.
///
/// Returns `None` for unparsable references and for non-HTTP schemes such as
/// `javascript:`, `mailto:`, or `data:`. Fragments are dropped.
pub fn resolve_reference(href: &str, base: &Url) -> Option<Url> {
    let href = fix_feed_scheme(href);
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut resolved = base.join(&href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") || resolved.host().is_none() {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Parses a user-supplied feed location into its normalized form.
pub fn normalize_url(input: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&fix_feed_scheme(input))?;
    url.set_fragment(None);
    Ok(url)
}

/// Exact scheme, host, and port equality.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host() == b.host()
        && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://example.com/blog/").unwrap()
    }

    #[test]
    fn test_fix_feed_scheme() {
        assert_eq!(fix_feed_scheme("feed://example.com/rss"), "http://example.com/rss");
        assert_eq!(
            fix_feed_scheme("FEED:https://example.com/rss"),
            "https://example.com/rss"
        );
        assert_eq!(fix_feed_scheme("  /rss.xml "), "/rss.xml");
        assert_eq!(fix_feed_scheme("rss"), "rss");
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        assert_eq!(
            resolve_reference("feed.xml", &base()).unwrap().as_str(),
            "http://example.com/blog/feed.xml"
        );
        assert_eq!(
            resolve_reference("/rss.xml#top", &base()).unwrap().as_str(),
            "http://example.com/rss.xml"
        );
        assert_eq!(
            resolve_reference("//cdn.example.com/feed", &base()).unwrap().as_str(),
            "http://cdn.example.com/feed"
        );
    }

    #[test]
    fn test_resolve_rejects_non_http() {
        assert!(resolve_reference("javascript:void(0)", &base()).is_none());
        assert!(resolve_reference("mailto:me@example.com", &base()).is_none());
        assert!(resolve_reference("#section", &base()).is_none());
        assert!(resolve_reference("", &base()).is_none());
        assert!(resolve_reference("http://[bad", &base()).is_none());
    }

    #[test]
    fn test_resolve_normalizes_path() {
        let resolved = resolve_reference("//evil.com/../../etc/passwd", &base()).unwrap();
        assert_eq!(resolved.host_str(), Some("evil.com"));
        assert!(!resolved.path().contains(".."));
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("http://example.com/a").unwrap();
        assert!(same_origin(&a, &Url::parse("http://example.com:80/b").unwrap()));
        assert!(!same_origin(&a, &Url::parse("https://example.com/a").unwrap()));
        assert!(!same_origin(&a, &Url::parse("http://example.com:8080/a").unwrap()));
        assert!(!same_origin(&a, &Url::parse("http://feeds.example.com/a").unwrap()));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("feed://Example.com/rss#x").unwrap().as_str(),
            "http://example.com/rss"
        );
        assert!(normalize_url("not a url").is_err());
    }
}
