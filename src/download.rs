//! Core download engine and its control surface.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::http::{HttpClient, ReqwestClient, RemoteInfo};
use crate::plan::{effective_segment_count, plan_segments};
use crate::record::ProgressStore;
use crate::segment::{Control, SegmentExit, SegmentWriter, WriterContext};
use crate::stats::{FileStats, TransferStatsTracker};

/// Trait for receiving transfer notifications.
///
/// All methods have default no-op implementations for convenience.
pub trait TransferEvents: Send + Sync {
    /// Called once, before any segment starts, with the total length.
    fn on_start(&self, _total: u64) {}

    /// Called with the number of bytes written since the last call.
    fn on_progress(&self, _delta: u64) {}

    /// Called when the transfer fails.
    fn on_error(&self, _message: &str) {}

    /// Called once after a cancelled transfer has been cleaned up.
    fn on_cancel(&self) {}

    /// Called when every byte is on disk (and verified, if a digest was given).
    fn on_complete(&self, _stats: &FileStats) {}
}

/// A null implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl TransferEvents for NoEvents {}

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Planning,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    /// Returns true once the transfer can no longer make progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State shared between the engine and its handles.
#[derive(Debug)]
struct Shared {
    state: Mutex<TransferState>,
    control: watch::Sender<Control>,
}

impl Shared {
    fn new() -> Self {
        let (control, _) = watch::channel(Control::Running);
        Self {
            state: Mutex::new(TransferState::Idle),
            control,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> TransferState {
        *self.lock()
    }

    fn set(&self, next: TransferState) {
        *self.lock() = next;
    }

    fn control(&self) -> Control {
        *self.control.borrow()
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.lock();
        match *state {
            TransferState::Idle | TransferState::Failed => {
                *state = TransferState::Planning;
                self.control.send_replace(Control::Running);
                Ok(())
            }
            other => Err(Error::InvalidState {
                action: "start",
                state: other,
            }),
        }
    }

    fn enter_downloading(&self) -> Result<()> {
        let mut state = self.lock();
        if self.control() == Control::Cancelled {
            return Err(Error::Cancelled);
        }
        *state = TransferState::Downloading;
        Ok(())
    }

    /// Marks the transfer completed unless a cancel already landed.
    fn complete(&self) -> bool {
        let mut state = self.lock();
        if self.control() == Control::Cancelled {
            return false;
        }
        *state = TransferState::Completed;
        true
    }

    fn pause(&self) -> Result<()> {
        let mut state = self.lock();
        match *state {
            TransferState::Downloading | TransferState::Paused => {
                self.steer(Control::Paused)?;
                *state = TransferState::Paused;
                log::info!("Transfer paused");
                Ok(())
            }
            other => Err(Error::InvalidState {
                action: "pause",
                state: other,
            }),
        }
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.lock();
        match *state {
            TransferState::Downloading | TransferState::Paused => {
                self.steer(Control::Running)?;
                *state = TransferState::Downloading;
                log::info!("Transfer resumed");
                Ok(())
            }
            other => Err(Error::InvalidState {
                action: "resume",
                state: other,
            }),
        }
    }

    /// Switches between running and paused unless workers were told to stop.
    fn steer(&self, next: Control) -> Result<()> {
        let mut stopped = None;
        self.control.send_if_modified(|control| {
            if control.is_stop() {
                stopped = Some(*control);
                false
            } else {
                *control = next;
                true
            }
        });
        match stopped {
            Some(Control::Cancelled) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn cancel(&self) -> Result<()> {
        let state = self.lock();
        match *state {
            TransferState::Planning | TransferState::Downloading | TransferState::Paused => {
                self.control.send_replace(Control::Cancelled);
                log::info!("Transfer cancellation requested");
                Ok(())
            }
            other => Err(Error::InvalidState {
                action: "cancel",
                state: other,
            }),
        }
    }

    fn abort(&self) {
        self.control.send_if_modified(|control| {
            if *control == Control::Cancelled {
                false
            } else {
                *control = Control::Aborted;
                true
            }
        });
    }
}

/// Cloneable control surface of a running transfer.
///
/// Obtained from [`DownloadEngine::handle`]; usable from any task while
/// [`DownloadEngine::start`] is running.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    shared: Arc<Shared>,
}

impl TransferHandle {
    /// Suspends every segment worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the transfer is downloading or paused.
    pub fn pause(&self) -> Result<()> {
        self.shared.pause()
    }

    /// Lets paused segment workers continue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the transfer is downloading or paused.
    pub fn resume(&self) -> Result<()> {
        self.shared.resume()
    }

    /// Requests cancellation; the engine deletes all artifacts once workers exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the transfer is not in progress.
    pub fn cancel(&self) -> Result<()> {
        self.shared.cancel()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.shared.state()
    }
}

/// Returns true if the recorded segments tile `[0, length)` without gaps.
fn covers(store: &ProgressStore, length: u64) -> bool {
    let mut next = 0u64;
    for progress in store.segments() {
        if progress.segment.start != next {
            return false;
        }
        next = progress.segment.end_exclusive();
    }
    next == length
}

/// Forwards worker progress to the caller's sink while feeding statistics.
struct ProgressRelay {
    events: Arc<dyn TransferEvents>,
    stats: Arc<TransferStatsTracker>,
}

impl TransferEvents for ProgressRelay {
    fn on_progress(&self, delta: u64) {
        self.stats.record_bytes(delta);
        self.events.on_progress(delta);
    }
}

/// Resumable, segmented downloader for a single file.
pub struct DownloadEngine<C: HttpClient + ?Sized = ReqwestClient, F: FileSystem = TokioFileSystem> {
    client: Arc<C>,
    fs: F,
    config: TransferConfig,
    events: Arc<dyn TransferEvents>,
    shared: Arc<Shared>,
}

impl DownloadEngine<ReqwestClient, TokioFileSystem> {
    /// Creates an engine using `reqwest` and `tokio::fs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TransferConfig, events: Arc<dyn TransferEvents>) -> Result<Self> {
        Ok(Self::with_parts(
            Arc::new(ReqwestClient::new()?),
            TokioFileSystem,
            config,
            events,
        ))
    }
}

impl<C: HttpClient + ?Sized + 'static, F: FileSystem> DownloadEngine<C, F> {
    /// Creates an engine with custom network and file system implementations.
    #[must_use]
    pub fn with_parts(
        client: Arc<C>,
        fs: F,
        config: TransferConfig,
        events: Arc<dyn TransferEvents>,
    ) -> Self {
        Self {
            client,
            fs,
            config,
            events,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Returns the transfer configuration.
    #[must_use]
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Returns a cloneable handle for pausing, resuming and cancelling.
    #[must_use]
    pub fn handle(&self) -> TransferHandle {
        TransferHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.shared.state()
    }

    /// See [`TransferHandle::pause`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the transfer is downloading or paused.
    pub fn pause(&self) -> Result<()> {
        self.shared.pause()
    }

    /// See [`TransferHandle::resume`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the transfer is downloading or paused.
    pub fn resume(&self) -> Result<()> {
        self.shared.resume()
    }

    /// See [`TransferHandle::cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the transfer is not in progress.
    pub fn cancel(&self) -> Result<()> {
        self.shared.cancel()
    }

    /// Runs the transfer to a terminal state.
    ///
    /// Resumes from an existing target file and progress record when both are
    /// present and consistent; otherwise plans a fresh transfer. Legal from
    /// `Idle`, and from `Failed` to retry as a resume.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] after a cancellation has been cleaned up,
    /// [`Error::InvalidState`] if the engine is not startable, or the first
    /// failure of planning or of any segment.
    pub async fn start(&self) -> Result<FileStats> {
        self.config.validate()?;
        self.shared.begin()?;

        let outcome = self.run().await.and_then(|stats| {
            if self.shared.complete() {
                Ok(stats)
            } else {
                Err(Error::Cancelled)
            }
        });

        match outcome {
            Ok(stats) => {
                log::info!(
                    "Transfer of {} complete ({} bytes fetched)",
                    self.config.filename,
                    stats.transferred
                );
                self.events.on_complete(&stats);
                Ok(stats)
            }
            Err(_) if self.shared.control() == Control::Cancelled => {
                self.remove_artifacts().await;
                self.shared.set(TransferState::Cancelled);
                log::info!("Transfer of {} cancelled", self.config.filename);
                self.events.on_cancel();
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.shared.set(TransferState::Failed);
                log::error!("Transfer of {} failed: {e}", self.config.filename);
                self.events.on_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<FileStats> {
        let info = self.client.probe(&self.config.url).await?;
        log::debug!("Probed {}: {info:?}", self.config.url);
        self.fs.create_dir_all(&self.config.directory).await?;

        let stats = match info {
            RemoteInfo {
                content_length: Some(length),
                accepts_ranges: true,
            } => self.run_segmented(length).await?,
            RemoteInfo { content_length, .. } => {
                log::info!("Server does not support ranged downloads, using a single stream");
                self.run_single_stream(content_length).await?
            }
        };

        if let Some(expected) = &self.config.expected_sha256 {
            let target = self.config.target_path();
            if let Err(e) = crate::verify::verify_sha256(&target, expected).await {
                if matches!(e, Error::ChecksumMismatch { .. })
                    && let Err(remove) = self.fs.remove_file(&target).await
                {
                    log::warn!("Failed to remove {}: {remove}", target.display());
                }
                return Err(e);
            }
        }
        Ok(stats)
    }

    async fn run_segmented(&self, length: u64) -> Result<FileStats> {
        let target = self.config.target_path();
        let record = self.config.record_path();
        let count = effective_segment_count(length, self.config.segment_count);

        let store = match self.try_resume(length, count, &target, &record).await? {
            Some(store) => {
                log::info!(
                    "Resuming {} with {} of {length} bytes on disk",
                    self.config.filename,
                    store.total_written()
                );
                store
            }
            None => {
                let plan = plan_segments(length, self.config.segment_count);
                log::info!(
                    "Planning {} ({length} bytes) in {} segments",
                    self.config.filename,
                    plan.len()
                );
                drop(self.fs.create_file(&target, length).await?);
                let record_file = self.fs.create_file(&record, 0).await?;
                ProgressStore::initialize(record_file, &plan).await?
            }
        };
        let resumed_from = store.total_written();

        let mut targets = Vec::with_capacity(store.segment_count());
        for _ in 0..store.segment_count() {
            targets.push(self.fs.open_file(&target).await?);
        }

        self.shared.enter_downloading()?;
        self.events.on_start(length);

        let store = Arc::new(store);
        let stats = Arc::new(TransferStatsTracker::new());
        let relay: Arc<dyn TransferEvents> = Arc::new(ProgressRelay {
            events: Arc::clone(&self.events),
            stats: Arc::clone(&stats),
        });
        let url: Arc<str> = Arc::from(self.config.url.as_str());

        let mut tasks = JoinSet::new();
        for (progress, file) in store.segments().into_iter().zip(targets) {
            let index = progress.segment.index;
            let writer = SegmentWriter::ranged(
                progress,
                Arc::clone(&store),
                file,
                self.writer_context(&url, &relay),
            );
            tasks.spawn(async move { (index, writer.run().await) });
        }

        let outcome = self.join_segments(tasks).await;

        if let Some(store) = Arc::into_inner(store) {
            store.close().await?;
        }
        outcome?;

        self.fs.remove_file(&record).await?;
        Ok(stats.file_stats(length, resumed_from))
    }

    /// Waits for every worker; the first failure aborts the siblings.
    async fn join_segments(&self, mut tasks: JoinSet<(usize, Result<SegmentExit>)>) -> Result<()> {
        let total = tasks.len();
        let mut finished = 0usize;
        let mut failure: Option<Error> = None;

        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    self.shared.abort();
                    failure.get_or_insert(Error::Download(format!("segment task failed: {e}")));
                    continue;
                }
            };
            match result {
                Ok(SegmentExit::Finished) => finished += 1,
                Ok(SegmentExit::Stopped) => log::debug!("Segment {index} stopped"),
                Err(e) if failure.is_none() => {
                    log::warn!("Segment {index} failed, aborting remaining segments: {e}");
                    self.shared.abort();
                    failure = Some(e);
                }
                Err(e) => log::warn!("Segment {index} also failed: {e}"),
            }
        }

        if self.shared.control() == Control::Cancelled {
            return Err(Error::Cancelled);
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if finished == total {
            Ok(())
        } else {
            Err(Error::Download(format!(
                "only {finished} of {total} segments finished"
            )))
        }
    }

    /// Loads a consistent previous state, or discards whatever is left over.
    async fn try_resume(
        &self,
        length: u64,
        count: usize,
        target: &Path,
        record: &Path,
    ) -> Result<Option<ProgressStore>> {
        let target_size = self.fs.file_size(target).await;
        let record_exists = self.fs.file_exists(record).await;

        match (target_size, record_exists) {
            (None, false) => return Ok(None),
            (Some(size), true) if size == length => {
                let file = self.fs.open_file(record).await?;
                match ProgressStore::load(file, count).await {
                    Ok(store) if covers(&store, length) => return Ok(Some(store)),
                    Ok(_) => log::warn!("Progress record does not match the current plan, restarting"),
                    Err(Error::CorruptRecord(reason)) => {
                        log::warn!("Discarding unreadable progress record: {reason}");
                    }
                    Err(e) => return Err(e),
                }
            }
            (Some(size), true) => {
                log::warn!("Target holds {size} bytes but remote has {length}, restarting");
            }
            _ => log::info!("Discarding incomplete transfer state for {}", self.config.filename),
        }

        self.fs.remove_file(target).await?;
        self.fs.remove_file(record).await?;
        Ok(None)
    }

    /// Fetches the whole file through one request; nothing is resumable.
    async fn run_single_stream(&self, length: Option<u64>) -> Result<FileStats> {
        let target = self.config.target_path();
        self.fs.remove_file(&self.config.record_path()).await?;
        let file = self.fs.create_file(&target, 0).await?;

        self.shared.enter_downloading()?;
        self.events.on_start(length.unwrap_or(0));

        let stats = Arc::new(TransferStatsTracker::new());
        let relay: Arc<dyn TransferEvents> = Arc::new(ProgressRelay {
            events: Arc::clone(&self.events),
            stats: Arc::clone(&stats),
        });
        let url: Arc<str> = Arc::from(self.config.url.as_str());
        let writer = SegmentWriter::whole(length, file, self.writer_context(&url, &relay));

        match writer.run().await? {
            SegmentExit::Finished => Ok(stats.file_stats(stats.transferred(), 0)),
            SegmentExit::Stopped => Err(Error::Cancelled),
        }
    }

    fn writer_context(&self, url: &Arc<str>, relay: &Arc<dyn TransferEvents>) -> WriterContext<C> {
        WriterContext {
            client: Arc::clone(&self.client),
            url: Arc::clone(url),
            events: Arc::clone(relay),
            control: self.shared.control.subscribe(),
            buffer_size: self.config.buffer_size,
        }
    }

    async fn remove_artifacts(&self) {
        for path in [self.config.target_path(), self.config.record_path()] {
            if let Err(e) = self.fs.remove_file(&path).await {
                log::warn!("Failed to remove {}: {e}", path.display());
            }
        }
    }
}
