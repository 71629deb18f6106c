use futures::StreamExt;
use reqwest::header::RANGE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::util::{cache_path, part_path, validate_source_url};

/// Playlists above this size are rejected.
const MAX_TEXT_SIZE: usize = 50 * 1024 * 1024; // 50MB

/// Guide downloads above this size are aborted.
const MAX_CACHED_SIZE: u64 = 2 * 1024 * 1024 * 1024; // 2GB

/// Errors that can occur while fetching a source document.
///
/// Every fetch returns one of these as a value; callers decide whether a
/// failure is fatal (all playlist sources failed) or merely recorded.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL failed validation (unparseable or non-HTTP scheme)
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// No headers, or no further body bytes, within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: u64 },
    /// Writing the cache copy failed
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP source fetcher with an on-disk cache.
///
/// All settings are explicit: the fetcher is built from the pipeline
/// configuration and passed to each stage.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
    timeout: Duration,
}

impl Fetcher {
    /// Creates a fetcher sending `user_agent` and writing copies to `cache_dir`.
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self::with_client(client, timeout, cache_dir))
    }

    /// Creates a fetcher around an existing client (tests, shared pools).
    pub fn with_client(
        client: reqwest::Client,
        timeout: Duration,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
            timeout,
        }
    }

    /// Downloads a text source (playlist) and returns its decoded body.
    ///
    /// The body is always fetched fresh, decoded as UTF-8 (invalid sequences
    /// are replaced), and written to the cache location before returning.
    /// No retries: the caller decides what a failed source means.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - URL is not http(s)
    /// - [`FetchError::Timeout`] - no headers, or the body stalled, within the timeout
    /// - [`FetchError::Network`] - connection or TLS errors
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::ResponseTooLarge`] - body exceeded 50MB
    /// - [`FetchError::IncompleteResponse`] - body shorter than Content-Length
    /// - [`FetchError::Io`] - cache copy could not be written
    pub async fn fetch_text(&self, url: &str, range: Option<&str>) -> Result<String, FetchError> {
        let response = self.send(url, range).await?;
        let bytes = read_limited_bytes(response, MAX_TEXT_SIZE, self.timeout).await?;

        let path = cache_path(&self.cache_dir, url);
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!(url = %url, bytes = bytes.len(), cache = %path.display(), "Fetched text source");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Returns a cached local copy of a binary source (guide), downloading
    /// it only when no non-empty copy exists yet.
    ///
    /// Cached copies are reused as-is for the rest of the run. Downloads are
    /// streamed to a `.part` file and renamed into place, so an interrupted
    /// download never masquerades as a cache hit.
    pub async fn fetch_cached(&self, url: &str) -> Result<PathBuf, FetchError> {
        let path = cache_path(&self.cache_dir, url);

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.is_file() && meta.len() > 0 {
                tracing::info!(url = %url, cache = %path.display(), "Cache hit");
                return Ok(path);
            }
        }

        let response = self.send(url, None).await?;
        let expected = response.content_length();
        if expected.is_some_and(|len| len > MAX_CACHED_SIZE) {
            return Err(FetchError::ResponseTooLarge);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let temp_path = part_path(&path);
        let written = match stream_to_file(response, &temp_path, self.timeout).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected {
            if written < expected {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(FetchError::IncompleteResponse {
                    expected,
                    received: written,
                });
            }
        }

        tokio::fs::rename(&temp_path, &path).await?;
        tracing::info!(url = %url, bytes = written, cache = %path.display(), "Downloaded source to cache");
        Ok(path)
    }

    async fn send(&self, url: &str, range: Option<&str>) -> Result<reqwest::Response, FetchError> {
        validate_source_url(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, format!("bytes={}", range));
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            tracing::warn!(url = %url, status = %response.status(), "Source returned error status");
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        Ok(response)
    }
}

/// Waits for the next body chunk, failing once `timeout` passes without one.
///
/// The deadline is per chunk, so a large guide that keeps streaming is never
/// cut off while a stalled upstream still fails.
async fn next_chunk<S>(stream: &mut S, timeout: Duration) -> Result<Option<S::Item>, FetchError>
where
    S: futures::Stream + Unpin,
{
    tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| FetchError::Timeout(timeout))
}

async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
    timeout: Duration,
) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = next_chunk(&mut stream, timeout).await? {
        let chunk = chunk.map_err(FetchError::Network)?;
        written = written.saturating_add(chunk.len() as u64);
        if written > MAX_CACHED_SIZE {
            return Err(FetchError::ResponseTooLarge);
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = next_chunk(&mut stream, timeout).await? {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len() as u64,
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:-1,One\nhttp://x/1\n";

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "streamledger_fetch_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    /// Serves one response whose headers promise more body than is ever sent.
    async fn stalled_body_server(path: &str) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n#EXTM3U\n")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        format!("http://{}{}", addr, path)
    }

    fn fetcher(dir: &Path) -> Fetcher {
        Fetcher::new("StreamLedger-Test/1.0", Duration::from_secs(5), dir).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_text_success_writes_cache() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uk.m3u"))
            .and(header("user-agent", "StreamLedger-Test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PLAYLIST))
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("text_ok");
        let url = format!("{}/uk.m3u", mock_server.uri());
        let text = fetcher(&dir).fetch_text(&url, None).await.unwrap();
        assert_eq!(text, PLAYLIST);

        let cached = std::fs::read_to_string(cache_path(&dir, &url)).unwrap();
        assert_eq!(cached, PLAYLIST);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_text_sends_range() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=0-1023"))
            .respond_with(ResponseTemplate::new(206).set_body_string(PLAYLIST))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("text_range");
        let url = format!("{}/uk.m3u", mock_server.uri());
        let result = fetcher(&dir).fetch_text(&url, Some("0-1023")).await;
        assert!(result.is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_text_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("text_404");
        let url = format!("{}/missing.m3u", mock_server.uri());
        match fetcher(&dir).fetch_text(&url, None).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
        assert!(!cache_path(&dir, &url).exists());
    }

    #[tokio::test]
    async fn test_fetch_text_no_retry_on_500() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("text_500");
        let url = format!("{}/uk.m3u", mock_server.uri());
        let err = fetcher(&dir).fetch_text(&url, None).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_fetch_text_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(PLAYLIST)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("text_timeout");
        let fetcher = Fetcher::new("t", Duration::from_millis(200), &dir).unwrap();
        let url = format!("{}/slow.m3u", mock_server.uri());
        assert!(matches!(
            fetcher.fetch_text(&url, None).await,
            Err(FetchError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_scheme_rejected_without_request() {
        let dir = scratch_dir("bad_scheme");
        let result = fetcher(&dir).fetch_text("ftp://example.com/uk.m3u", None).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_fetch_cached_downloads_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<tv></tv>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("cached_once");
        let fetcher = fetcher(&dir);
        let url = format!("{}/guide.xml", mock_server.uri());

        let first = fetcher.fetch_cached(&url).await.unwrap();
        let second = fetcher.fetch_cached(&url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "<tv></tv>");
        assert!(!part_path(&first).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_cached_refetches_empty_copy() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<tv/>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("cached_empty");
        let url = format!("{}/guide.xml", mock_server.uri());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(cache_path(&dir, &url), b"").unwrap();

        let path = fetcher(&dir).fetch_cached(&url).await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<tv/>");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_cached_error_leaves_no_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let dir = scratch_dir("cached_error");
        let url = format!("{}/guide.xml", mock_server.uri());
        let err = fetcher(&dir).fetch_cached(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(503)));
        assert!(!cache_path(&dir, &url).exists());
    }

    #[tokio::test]
    async fn test_fetch_text_stalled_body_times_out() {
        let url = stalled_body_server("/uk.m3u").await;
        let dir = scratch_dir("text_stall");
        let fetcher =
            Fetcher::new("StreamLedger-Test/1.0", Duration::from_millis(300), &dir).unwrap();

        let started = std::time::Instant::now();
        let err = fetcher.fetch_text(&url, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!cache_path(&dir, &url).exists());
    }

    #[tokio::test]
    async fn test_fetch_cached_stalled_body_leaves_no_file() {
        let url = stalled_body_server("/guide.xml").await;
        let dir = scratch_dir("cached_stall");
        let fetcher =
            Fetcher::new("StreamLedger-Test/1.0", Duration::from_millis(300), &dir).unwrap();

        let err = fetcher.fetch_cached(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)), "got {:?}", err);
        let cached = cache_path(&dir, &url);
        assert!(!cached.exists());
        assert!(!part_path(&cached).exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
