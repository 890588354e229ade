//! Network collaborator used by the transfer engine.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{StatusCode, header};

use crate::error::{Error, Result};

/// A stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// What the server reports about a resource before a transfer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Length of the resource, if the server reported one.
    pub content_length: Option<u64>,
    /// Whether the server accepts `Range: bytes=` requests.
    pub accepts_ranges: bool,
}

/// A response body ready to be consumed.
pub struct Body {
    /// Length the server announced for this body.
    pub content_length: Option<u64>,
    /// The body bytes.
    pub stream: ByteStream,
}

/// Issues the requests a transfer needs.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Queries length and range support of `url`.
    async fn probe(&self, url: &str) -> Result<RemoteInfo>;

    /// Fetches `url`, restricted to the inclusive byte `range` when given.
    async fn fetch(&self, url: &str, range: Option<(u64, u64)>) -> Result<Body>;

    /// Sends `body` of `length` bytes to `url`.
    async fn upload(
        &self,
        url: &str,
        content_type: &str,
        length: u64,
        body: ByteStream,
    ) -> Result<()>;
}

/// Formats an inclusive byte range as a `Range` header value.
#[must_use]
pub fn range_header(start: u64, end: u64) -> String {
    format!("bytes={start}-{end}")
}

/// Builds a configured HTTP client for transfer requests.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("segfetch/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }

    /// Wraps an already configured `reqwest` client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn header_u64(headers: &header::HeaderMap, name: header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn accepts_byte_ranges(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn probe(&self, url: &str) -> Result<RemoteInfo> {
        let response = self.client.head(url).send().await?.error_for_status()?;
        let headers = response.headers();
        Ok(RemoteInfo {
            content_length: header_u64(headers, header::CONTENT_LENGTH),
            accepts_ranges: accepts_byte_ranges(headers),
        })
    }

    async fn fetch(&self, url: &str, range: Option<(u64, u64)>) -> Result<Body> {
        let mut request = self.client.get(url);
        if let Some((start, end)) = range {
            request = request.header(header::RANGE, range_header(start, end));
        }

        let response = request.send().await?.error_for_status()?;
        if range.is_some() && response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(Error::Network(format!(
                "server ignored range request (status {})",
                response.status()
            )));
        }

        Ok(Body {
            content_length: response.content_length(),
            stream: response.bytes_stream().map(|r| r.map_err(Error::from)).boxed(),
        })
    }

    async fn upload(
        &self,
        url: &str,
        content_type: &str,
        length: u64,
        body: ByteStream,
    ) -> Result<()> {
        self.client
            .post(url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn range_header_is_inclusive() {
        assert_eq!(range_header(0, 32), "bytes=0-32");
        assert_eq!(range_header(66, 99), "bytes=66-99");
    }

    #[test]
    fn accept_ranges_parsing() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_byte_ranges(&headers));

        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!accepts_byte_ranges(&headers));

        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(accepts_byte_ranges(&headers));
    }

    #[test]
    fn content_length_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_u64(&headers, header::CONTENT_LENGTH), None);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(header_u64(&headers, header::CONTENT_LENGTH), Some(1024));
    }

    #[test]
    fn reqwest_client_builds() {
        assert!(ReqwestClient::new().is_ok());
    }
}
