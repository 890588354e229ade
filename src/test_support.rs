//! In-memory collaborators shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::download::TransferEvents;
use crate::error::{Error, Result};
use crate::http::{Body, ByteStream, HttpClient, RemoteInfo};
use crate::stats::FileStats;

/// Deterministic, non-repeating-looking test payload.
pub fn sample_data(len: usize) -> Bytes {
    (0..len)
        .map(|i| u8::try_from((i * 31 + i / 251) % 251).unwrap())
        .collect::<Vec<_>>()
        .into()
}

/// Serves a fixed byte buffer, honouring inclusive ranges.
pub struct MockClient {
    data: Bytes,
    chunk_size: usize,
    accepts_ranges: bool,
    report_length: bool,
    fail_at: Mutex<Option<u64>>,
    stall_at: Option<u64>,
    gate: Option<Arc<Semaphore>>,
    probe_gate: Option<Arc<Semaphore>>,
    requests: Mutex<Vec<Option<(u64, u64)>>>,
    uploads: Mutex<Vec<(String, String, u64, Vec<u8>)>>,
}

impl MockClient {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            chunk_size: 16,
            accepts_ranges: true,
            report_length: true,
            fail_at: Mutex::new(None),
            stall_at: None,
            gate: None,
            probe_gate: None,
            requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Streams fail with a network error once they reach absolute offset `at`.
    pub fn failing_at(self, at: u64) -> Self {
        *self.fail_at.lock().unwrap() = Some(at);
        self
    }

    /// Streams stop delivering, without ending, once they reach offset `at`.
    pub fn stalling_at(mut self, at: u64) -> Self {
        self.stall_at = Some(at);
        self
    }

    /// `probe` waits for one permit of `gate`.
    pub fn gated_probe(mut self, gate: Arc<Semaphore>) -> Self {
        self.probe_gate = Some(gate);
        self
    }

    /// Every streamed chunk waits for one permit of `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn without_ranges(mut self) -> Self {
        self.accepts_ranges = false;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn clear_failure(&self) {
        *self.fail_at.lock().unwrap() = None;
    }

    pub fn requested_ranges(&self) -> Vec<Option<(u64, u64)>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, String, u64, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

struct StreamState {
    data: Bytes,
    pos: usize,
    end: usize,
    chunk_size: usize,
    fail_at: Option<usize>,
    stall_at: Option<usize>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl HttpClient for MockClient {
    async fn probe(&self, _url: &str) -> Result<RemoteInfo> {
        if let Some(gate) = &self.probe_gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Network(e.to_string()))?
                .forget();
        }
        Ok(RemoteInfo {
            content_length: self.report_length.then_some(self.data.len() as u64),
            accepts_ranges: self.accepts_ranges,
        })
    }

    async fn fetch(&self, _url: &str, range: Option<(u64, u64)>) -> Result<Body> {
        self.requests.lock().unwrap().push(range);

        let len = self.data.len();
        let (pos, end) = match range {
            Some((start, end)) => (
                usize::try_from(start).unwrap().min(len),
                usize::try_from(end + 1).unwrap().min(len),
            ),
            None => (0, len),
        };
        let state = StreamState {
            data: self.data.clone(),
            pos,
            end,
            chunk_size: self.chunk_size,
            fail_at: self
                .fail_at
                .lock()
                .unwrap()
                .map(|at| usize::try_from(at).unwrap()),
            stall_at: self.stall_at.map(|at| usize::try_from(at).unwrap()),
            gate: self.gate.clone(),
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            if st.pos >= st.end {
                return None;
            }
            if let Some(gate) = &st.gate {
                gate.acquire().await.ok()?.forget();
            }
            if st.fail_at.is_some_and(|at| st.pos >= at) {
                st.pos = st.end;
                return Some((Err(Error::Network("connection reset".into())), st));
            }
            if st.stall_at.is_some_and(|at| st.pos >= at) {
                futures::future::pending::<()>().await;
            }
            let mut next = (st.pos + st.chunk_size).min(st.end);
            for at in [st.fail_at, st.stall_at].into_iter().flatten() {
                if at > st.pos {
                    next = next.min(at);
                }
            }
            let chunk = st.data.slice(st.pos..next);
            st.pos = next;
            Some((Ok(chunk), st))
        });

        Ok(Body {
            content_length: Some((end - pos) as u64),
            stream: stream.boxed(),
        })
    }

    async fn upload(
        &self,
        url: &str,
        content_type: &str,
        length: u64,
        mut body: ByteStream,
    ) -> Result<()> {
        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            received.extend_from_slice(&chunk?);
        }
        self.uploads.lock().unwrap().push((
            url.to_string(),
            content_type.to_string(),
            length,
            received,
        ));
        Ok(())
    }
}

/// An event observed by [`RecordingEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(u64),
    Progress(u64),
    Error(String),
    Cancel,
    Complete(u64),
}

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress_deltas(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(delta) => Some(delta),
                _ => None,
            })
            .collect()
    }

    pub fn progress_total(&self) -> u64 {
        self.progress_deltas().iter().sum()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl TransferEvents for RecordingEvents {
    fn on_start(&self, total: u64) {
        self.events.lock().unwrap().push(Event::Start(total));
    }

    fn on_progress(&self, delta: u64) {
        self.events.lock().unwrap().push(Event::Progress(delta));
    }

    fn on_error(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(message.to_string()));
    }

    fn on_cancel(&self) {
        self.events.lock().unwrap().push(Event::Cancel);
    }

    fn on_complete(&self, stats: &FileStats) {
        self.events.lock().unwrap().push(Event::Complete(stats.size));
    }
}
