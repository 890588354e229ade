//! Per-segment workers that stream a byte range into the target file.

use std::io::SeekFrom;
use std::sync::Arc;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;

use crate::download::TransferEvents;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::record::{ProgressStore, SegmentProgress};

/// Control state shared by the engine and all of its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Running,
    Paused,
    /// Stop and let the engine delete the transfer artifacts.
    Cancelled,
    /// Stop because a sibling segment failed; artifacts are kept.
    Aborted,
}

impl Control {
    pub(crate) const fn is_stop(self) -> bool {
        matches!(self, Self::Cancelled | Self::Aborted)
    }
}

/// How a worker left its loop without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentExit {
    /// Every planned byte is on disk.
    Finished,
    /// The control state told the worker to stop.
    Stopped,
}

/// Blocks while paused. Returns false once the worker must stop.
pub(crate) async fn wait_for_running(control: &mut watch::Receiver<Control>) -> bool {
    loop {
        let state = *control.borrow_and_update();
        match state {
            Control::Running => return true,
            Control::Cancelled | Control::Aborted => return false,
            Control::Paused => {
                if control.changed().await.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Resolves once the control state asks workers to stop.
async fn until_stopped(control: &mut watch::Receiver<Control>) {
    loop {
        let state = *control.borrow_and_update();
        if state.is_stop() || control.changed().await.is_err() {
            return;
        }
    }
}

/// Everything a worker shares with its siblings.
pub(crate) struct WriterContext<C: ?Sized> {
    pub client: Arc<C>,
    pub url: Arc<str>,
    pub events: Arc<dyn TransferEvents>,
    pub control: watch::Receiver<Control>,
    pub buffer_size: usize,
}

/// Fetches one byte range and writes it at its offset in the target file.
pub(crate) struct SegmentWriter<C: ?Sized> {
    index: usize,
    offset: u64,
    limit: Option<u64>,
    range: Option<(u64, u64)>,
    store: Option<Arc<ProgressStore>>,
    target: File,
    ctx: WriterContext<C>,
}

impl<C: HttpClient + ?Sized> SegmentWriter<C> {
    /// Worker for a planned segment; only its unfetched suffix is requested.
    pub(crate) fn ranged(
        progress: SegmentProgress,
        store: Arc<ProgressStore>,
        target: File,
        ctx: WriterContext<C>,
    ) -> Self {
        let offset = progress.resume_offset();
        let range = progress
            .segment
            .bounds()
            .map(|(_, end)| (offset, end))
            .filter(|_| !progress.is_complete());
        Self {
            index: progress.segment.index,
            offset,
            limit: Some(progress.remaining()),
            range,
            store: Some(store),
            target,
            ctx,
        }
    }

    /// Worker that copies a whole response from offset zero, without a progress record.
    pub(crate) fn whole(length: Option<u64>, target: File, ctx: WriterContext<C>) -> Self {
        Self {
            index: 0,
            offset: 0,
            limit: length,
            range: None,
            store: None,
            target,
            ctx,
        }
    }

    /// Runs the worker until its range is written, it is told to stop, or it fails.
    ///
    /// Cancellation takes effect within one read-buffer cycle: the control
    /// state is checked before every piece and raced against pending reads.
    pub(crate) async fn run(mut self) -> Result<SegmentExit> {
        if self.limit == Some(0) {
            log::debug!("Segment {} already complete", self.index);
            return Ok(SegmentExit::Finished);
        }
        if !wait_for_running(&mut self.ctx.control).await {
            return Ok(SegmentExit::Stopped);
        }

        log::debug!(
            "Segment {} requesting {:?} at offset {}",
            self.index,
            self.range,
            self.offset
        );
        let body = tokio::select! {
            res = self.ctx.client.fetch(&self.ctx.url, self.range) => res?,
            () = until_stopped(&mut self.ctx.control) => return Ok(SegmentExit::Stopped),
        };
        if let (Some(limit), Some(announced)) = (self.limit, body.content_length)
            && announced < limit
        {
            return Err(Error::Network(format!(
                "segment {} announced {announced} bytes, expected {limit}",
                self.index
            )));
        }

        self.target.seek(SeekFrom::Start(self.offset)).await?;
        let mut stream = body.stream;
        let mut written = 0u64;
        let piece_size = self.ctx.buffer_size.max(1);

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                () = until_stopped(&mut self.ctx.control) => {
                    self.target.flush().await?;
                    return Ok(SegmentExit::Stopped);
                }
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            let wanted = self.limit.map_or(chunk.len(), |limit| {
                usize::try_from(limit - written).map_or(chunk.len(), |left| left.min(chunk.len()))
            });

            for piece in chunk[..wanted].chunks(piece_size) {
                if !wait_for_running(&mut self.ctx.control).await {
                    self.target.flush().await?;
                    return Ok(SegmentExit::Stopped);
                }
                self.target.write_all(piece).await?;
                self.target.flush().await?;

                let len = piece.len() as u64;
                if let Some(store) = &self.store {
                    store.record_progress(self.index, len).await?;
                }
                written += len;
                self.ctx.events.on_progress(len);
            }

            if self.limit.is_some_and(|limit| written >= limit) {
                break;
            }
        }

        if let Some(limit) = self.limit
            && written < limit
        {
            return Err(Error::Network(format!(
                "segment {} ended {} bytes short",
                self.index,
                limit - written
            )));
        }

        log::debug!("Segment {} finished ({written} bytes)", self.index);
        Ok(SegmentExit::Finished)
    }
}
