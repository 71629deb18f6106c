use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a source URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
}

/// Validates a playlist or guide source URL.
///
/// Only `http` and `https` are fetched. Private and loopback hosts are
/// accepted.
///
/// # Examples
///
/// ```
/// use streamledger::util::validate_source_url;
///
/// assert!(validate_source_url("https://iptv-org.github.io/iptv/countries/uk.m3u").is_ok());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_source_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Computes the deterministic cache location for a source URL.
///
/// The file name is the URL's final path segment, prefixed with the first
/// eight hex digits of the SHA-256 of the full URL so that two hosts serving
/// `index.m3u` never share a cache entry. Characters outside
/// `[A-Za-z0-9._-]` are replaced with `_`; an empty segment becomes `index`.
pub fn cache_path(cache_dir: &Path, url: &str) -> PathBuf {
    let segment = Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "index".to_string());

    let sanitized: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let hash = Sha256::digest(url.as_bytes());
    let prefix: String = hash.iter().take(4).map(|b| format!("{:02x}", b)).collect();

    cache_dir.join(format!("{}-{}", prefix, sanitized))
}
