//! Fixed-layout progress record for resumable transfers.
//!
//! The record holds one 24-byte slot per segment at offset `index * 24`:
//! planned start, planned end (inclusive) and bytes written, each an 8-byte
//! big-endian signed integer. An empty segment stores `end = start - 1`.
//!
//! The layout differs from the older 16-byte-per-segment format, where one
//! field doubled as planned end and write cursor. Such a record is always
//! shorter than `24 * count` bytes, so it loads as corrupt and the transfer
//! restarts.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::plan::Segment;

/// Size in bytes of one segment slot.
pub const SLOT_SIZE: u64 = 24;

const WRITTEN_FIELD: u64 = 16;

/// A planned segment together with how much of it is already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentProgress {
    /// The planned range.
    pub segment: Segment,
    /// Bytes of the range already written to the target file.
    pub bytes_written: u64,
}

impl SegmentProgress {
    /// Absolute offset of the next byte to fetch.
    #[must_use]
    pub const fn resume_offset(&self) -> u64 {
        self.segment.start + self.bytes_written
    }

    /// Bytes still missing from the segment.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.segment.len.saturating_sub(self.bytes_written)
    }

    /// Returns true once every byte of the segment is written.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

/// Persisted per-segment progress, shared by all segment writers of a transfer.
///
/// Counters are kept in per-slot atomics for lock-free reads; the on-disk
/// update of a slot happens under a short store-wide lock.
#[derive(Debug)]
pub struct ProgressStore {
    file: Mutex<File>,
    segments: Vec<Segment>,
    written: Vec<AtomicU64>,
}

impl ProgressStore {
    /// Writes a fresh record for `plan` with every counter at zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the record cannot be sized or written.
    pub async fn initialize(mut file: File, plan: &[Segment]) -> Result<Self> {
        let mut buf = Vec::with_capacity(plan.len() * SLOT_SIZE as usize);
        for segment in plan {
            encode_slot(&mut buf, segment, 0)?;
        }

        file.set_len(buf.len() as u64).await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        log::debug!("Initialized progress record with {} slots", plan.len());

        Ok(Self {
            file: Mutex::new(file),
            segments: plan.to_vec(),
            written: plan.iter().map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// Reads back `segment_count` slots in index order.
    ///
    /// Contiguity of the ranges is not checked; the persisted plan is trusted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] if the record is shorter than
    /// `segment_count` slots or a slot holds impossible values, and
    /// [`Error::Io`] if it cannot be read.
    pub async fn load(mut file: File, segment_count: usize) -> Result<Self> {
        let expected = segment_count as u64 * SLOT_SIZE;
        let actual = file.metadata().await?.len();
        if actual < expected {
            return Err(Error::CorruptRecord(format!(
                "record holds {actual} bytes, expected {expected} for {segment_count} segments"
            )));
        }

        let mut buf = vec![0u8; segment_count * SLOT_SIZE as usize];
        file.seek(SeekFrom::Start(0)).await?;
        file.read_exact(&mut buf).await?;

        let mut segments = Vec::with_capacity(segment_count);
        let mut written = Vec::with_capacity(segment_count);
        for (index, slot) in buf.chunks_exact(SLOT_SIZE as usize).enumerate() {
            let (segment, bytes_written) = decode_slot(index, slot)?;
            segments.push(segment);
            written.push(AtomicU64::new(bytes_written));
        }

        Ok(Self {
            file: Mutex::new(file),
            segments,
            written,
        })
    }

    /// Adds `delta` to the persisted counter of segment `index` and returns the new total.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] for an unknown index and [`Error::Io`]
    /// if the slot cannot be written.
    pub async fn record_progress(&self, index: usize, delta: u64) -> Result<u64> {
        let counter = self
            .written
            .get(index)
            .ok_or_else(|| Error::CorruptRecord(format!("no slot for segment {index}")))?;

        let mut file = self.file.lock().await;
        let total = counter.fetch_add(delta, Ordering::AcqRel) + delta;
        file.seek(SeekFrom::Start(index as u64 * SLOT_SIZE + WRITTEN_FIELD))
            .await?;
        file.write_all(&to_field(total)?.to_be_bytes()).await?;
        file.flush().await?;
        Ok(total)
    }

    /// Current bytes-written counter of segment `index`.
    #[must_use]
    pub fn bytes_written(&self, index: usize) -> Option<u64> {
        self.written.get(index).map(|c| c.load(Ordering::Acquire))
    }

    /// Sum of all segment counters.
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.written.iter().map(|c| c.load(Ordering::Acquire)).sum()
    }

    /// Number of slots in the record.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Snapshot of every segment with its current counter.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentProgress> {
        self.segments
            .iter()
            .zip(&self.written)
            .map(|(segment, counter)| SegmentProgress {
                segment: *segment,
                bytes_written: counter.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Flushes the record to disk and releases the file handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final sync fails.
    pub async fn close(self) -> Result<()> {
        let mut file = self.file.into_inner();
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

fn to_field(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::CorruptRecord(format!("value {value} does not fit a record field")))
}

fn encode_slot(buf: &mut Vec<u8>, segment: &Segment, written: u64) -> Result<()> {
    let start = to_field(segment.start)?;
    let end = to_field(segment.end_exclusive())? - 1;
    buf.extend_from_slice(&start.to_be_bytes());
    buf.extend_from_slice(&end.to_be_bytes());
    buf.extend_from_slice(&to_field(written)?.to_be_bytes());
    Ok(())
}

fn read_field(slot: &[u8], at: usize) -> i64 {
    let mut field = [0u8; 8];
    field.copy_from_slice(&slot[at..at + 8]);
    i64::from_be_bytes(field)
}

fn decode_slot(index: usize, slot: &[u8]) -> Result<(Segment, u64)> {
    let start = read_field(slot, 0);
    let end = read_field(slot, 8);
    let written = read_field(slot, 16);

    if start < 0 || end < start - 1 || written < 0 {
        return Err(Error::CorruptRecord(format!(
            "slot {index} holds start={start} end={end} written={written}"
        )));
    }
    let len = u64::try_from(i128::from(end) - i128::from(start) + 1)
        .map_err(|_| Error::CorruptRecord(format!("slot {index} has an invalid length")))?;
    let segment = Segment {
        index,
        start: start.unsigned_abs(),
        len,
    };
    let written = written.unsigned_abs();
    if written > segment.len {
        return Err(Error::CorruptRecord(format!(
            "slot {index} claims {written} bytes written of {}",
            segment.len
        )));
    }
    Ok((segment, written))
}
