//! URL normalization and host comparison.
//!
//! Normalized form: lowercase scheme+host, no trailing slash on path, no
//! fragment. Two URLs are considered equal iff their normalized strings
//! are byte-equal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("not a valid absolute URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("scheme must be http or https, got {0:?}")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    NoHost,
}

/// Parse and normalize a URL string per the crawl's canonical form.
pub fn normalize(raw: &str) -> Result<String, UrlError> {
    let mut parsed = url::Url::parse(raw)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    if parsed.host_str().is_none() {
        return Err(UrlError::NoHost);
    }
    parsed.set_fragment(None);

    let mut s = parsed.to_string();
    if s.ends_with('/') {
        s.pop();
    }
    Ok(s)
}

/// Host with any leading `www.` stripped, used for politeness grouping
/// and same-host comparisons.
pub fn bare_host(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?;
    Some(strip_www(host).to_string())
}

pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// True if `a` and `b` share a host modulo a leading `www.`.
pub fn same_host(a: &str, b: &str) -> bool {
    match (bare_host(a), bare_host(b)) {
        (Some(ha), Some(hb)) => ha == hb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment_and_trailing_slash() {
        let n = normalize("https://Example.com/path/#section").unwrap();
        assert_eq!(n, "https://example.com/path");
    }

    #[test]
    fn idempotent() {
        let once = normalize("https://example.com/foo/").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(normalize("ftp://example.com/").is_err());
    }

    #[test]
    fn bare_host_strips_www() {
        assert_eq!(bare_host("https://www.example.com/x").unwrap(), "example.com");
        assert_eq!(bare_host("https://example.com/x").unwrap(), "example.com");
    }

    #[test]
    fn same_host_ignores_www() {
        assert!(same_host("https://www.example.com/a", "https://example.com/b"));
        assert!(!same_host("https://example.com/a", "https://other.com/b"));
    }
}
