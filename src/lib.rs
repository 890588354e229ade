//! segfetch - resumable, segmented HTTP downloads.
//!
//! A file is split into byte ranges that are fetched concurrently and written
//! at their offsets in a pre-sized target file. Per-segment progress is kept
//! in a small record file next to the target, so an interrupted transfer
//! picks up where each segment stopped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use segfetch::{DownloadEngine, NoEvents, TransferConfig};
//!
//! # async fn example() -> segfetch::Result<()> {
//! let config = TransferConfig::new()
//!     .with_url("https://example.com/image.iso")
//!     .with_directory("/tmp/downloads")
//!     .with_segment_count(4);
//!
//! let engine = Arc::new(DownloadEngine::new(config, Arc::new(NoEvents))?);
//! let handle = engine.handle();
//!
//! // Pause, resume or cancel from anywhere while `start` runs.
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     let _ = handle.pause();
//! });
//!
//! let stats = engine.start().await?;
//! println!("Fetched {} bytes", stats.transferred);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod fs;
pub mod http;
pub mod plan;
pub mod record;
mod segment;
pub mod stats;
pub mod upload;
pub mod verify;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::{AppConfig, TransferConfig};
pub use download::{DownloadEngine, NoEvents, TransferEvents, TransferHandle, TransferState};
pub use error::{Error, Result};
pub use fs::{FileSystem, TokioFileSystem};
pub use http::{Body, ByteStream, HttpClient, RemoteInfo, ReqwestClient};
pub use plan::{Segment, plan_segments};
pub use record::{ProgressStore, SegmentProgress};
pub use stats::FileStats;
pub use upload::{UploadRequest, UploadStream};
