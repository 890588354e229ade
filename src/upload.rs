//! Streaming upload of a local file.

use std::path::PathBuf;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::download::TransferEvents;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::stats::{FileStats, TransferStatsTracker};

/// Content type sent when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file to send as the body of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub url: String,
    pub path: PathBuf,
    pub content_type: String,
    pub buffer_size: usize,
}

impl UploadRequest {
    /// Creates a request with the default content type and buffer size.
    #[must_use]
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Overrides the `Content-Type` header.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets how many bytes are read from disk per body chunk.
    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// Sends a local file as a single streamed request body.
pub struct UploadStream<C: HttpClient + ?Sized> {
    client: Arc<C>,
    events: Arc<dyn TransferEvents>,
}

impl<C: HttpClient + ?Sized> UploadStream<C> {
    #[must_use]
    pub fn new(client: Arc<C>, events: Arc<dyn TransferEvents>) -> Self {
        Self { client, events }
    }

    /// Streams the file to the server, reporting progress as chunks are read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened, [`Error::Config`]
    /// for an empty URL, or whatever the server exchange fails with.
    pub async fn send(&self, request: &UploadRequest) -> Result<FileStats> {
        match self.transfer(request).await {
            Ok(stats) => {
                log::info!(
                    "Uploaded {} ({} bytes) to {}",
                    request.path.display(),
                    stats.size,
                    request.url
                );
                self.events.on_complete(&stats);
                Ok(stats)
            }
            Err(e) => {
                log::error!("Upload of {} failed: {e}", request.path.display());
                self.events.on_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn transfer(&self, request: &UploadRequest) -> Result<FileStats> {
        if request.url.trim().is_empty() {
            return Err(Error::Config("upload url is empty".into()));
        }

        let file = tokio::fs::File::open(&request.path).await?;
        let length = file.metadata().await?.len();
        self.events.on_start(length);

        let stats = Arc::new(TransferStatsTracker::new());
        let events = Arc::clone(&self.events);
        let tracker = Arc::clone(&stats);
        let body = ReaderStream::with_capacity(file, request.buffer_size.max(1))
            .map_err(Error::from)
            .inspect_ok(move |chunk| {
                let len = chunk.len() as u64;
                tracker.record_bytes(len);
                events.on_progress(len);
            })
            .boxed();

        self.client
            .upload(&request.url, &request.content_type, length, body)
            .await?;

        Ok(stats.file_stats(length, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Event, MockClient, RecordingEvents, sample_data};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn uploader(
        client: &Arc<MockClient>,
        events: &Arc<RecordingEvents>,
    ) -> UploadStream<MockClient> {
        UploadStream::new(
            Arc::clone(client),
            Arc::clone(events) as Arc<dyn TransferEvents>,
        )
    }

    #[tokio::test]
    async fn sends_whole_file_with_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        let data = sample_data(1_000);
        std::fs::write(&path, &data).unwrap();

        let client = Arc::new(MockClient::new(Bytes::new()));
        let events = Arc::new(RecordingEvents::default());
        let request = UploadRequest::new("http://mock/upload", &path)
            .with_content_type("text/csv")
            .with_buffer_size(128);

        let stats = uploader(&client, &events).send(&request).await.unwrap();

        assert_eq!(stats.size, 1_000);
        assert_eq!(stats.transferred, 1_000);
        let uploads = client.uploads();
        assert_eq!(uploads.len(), 1);
        let (url, content_type, length, body) = &uploads[0];
        assert_eq!(url, "http://mock/upload");
        assert_eq!(content_type, "text/csv");
        assert_eq!(*length, 1_000);
        assert_eq!(body, &data.to_vec());

        assert_eq!(events.events().first(), Some(&Event::Start(1_000)));
        assert_eq!(events.events().last(), Some(&Event::Complete(1_000)));
        assert_eq!(events.progress_total(), 1_000);
        assert!(events.progress_deltas().iter().all(|d| *d <= 128));
    }

    #[test]
    fn default_content_type() {
        let request = UploadRequest::new("http://mock/upload", "a.bin");
        assert_eq!(request.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(request.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn empty_file_sends_empty_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let client = Arc::new(MockClient::new(Bytes::new()));
        let events = Arc::new(RecordingEvents::default());
        let request = UploadRequest::new("http://mock/upload", &path);
        uploader(&client, &events).send(&request).await.unwrap();

        assert_eq!(client.uploads()[0].2, 0);
        assert!(client.uploads()[0].3.is_empty());
        assert_eq!(events.events(), vec![Event::Start(0), Event::Complete(0)]);
    }

    #[tokio::test]
    async fn missing_file_reports_error() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new(Bytes::new()));
        let events = Arc::new(RecordingEvents::default());
        let request = UploadRequest::new("http://mock/upload", dir.path().join("nope"));

        let err = uploader(&client, &events).send(&request).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(events.errors().len(), 1);
        assert!(client.uploads().is_empty());
    }
}
