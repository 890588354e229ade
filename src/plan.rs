//! Byte-range partitioning of a file into download segments.

/// Segment count used when the configured count is zero.
pub const DEFAULT_SEGMENT_COUNT: usize = 3;

/// Upper bound on concurrent segments. Every segment holds its own target
/// file handle and request for the whole transfer.
pub const MAX_SEGMENT_COUNT: usize = 64;

/// One contiguous byte range of the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Position of the segment in the plan.
    pub index: usize,
    /// First byte offset covered by the segment.
    pub start: u64,
    /// Number of bytes covered. Zero only for the single segment of an empty file.
    pub len: u64,
}

impl Segment {
    /// Returns the inclusive `(start, end)` byte offsets, or `None` for an empty segment.
    #[must_use]
    pub const fn bounds(&self) -> Option<(u64, u64)> {
        if self.len == 0 {
            None
        } else {
            Some((self.start, self.start + self.len - 1))
        }
    }

    /// Offset one past the last byte of the segment.
    #[must_use]
    pub const fn end_exclusive(&self) -> u64 {
        self.start + self.len
    }
}

/// Resolves the number of segments actually used for a file.
///
/// A configured count of zero falls back to [`DEFAULT_SEGMENT_COUNT`]. The
/// count never exceeds [`MAX_SEGMENT_COUNT`] or the file length, and an empty
/// file gets one segment.
#[must_use]
pub fn effective_segment_count(file_length: u64, configured: usize) -> usize {
    let configured = if configured == 0 {
        DEFAULT_SEGMENT_COUNT
    } else {
        configured.min(MAX_SEGMENT_COUNT)
    };
    if file_length == 0 {
        return 1;
    }
    usize::try_from(file_length).map_or(configured, |len| configured.min(len))
}

/// Splits `file_length` bytes into contiguous segments.
///
/// Every segment but the last spans `file_length / count` bytes; the last one
/// absorbs the remainder.
#[must_use]
pub fn plan_segments(file_length: u64, configured: usize) -> Vec<Segment> {
    let count = effective_segment_count(file_length, configured);
    let each = file_length / count as u64;

    (0..count)
        .map(|index| {
            let start = index as u64 * each;
            let len = if index == count - 1 {
                file_length - start
            } else {
                each
            };
            Segment { index, start, len }
        })
        .collect()
}
