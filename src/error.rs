//! Error types for the segfetch library.

use thiserror::Error;

/// Errors that can occur during transfer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on the target file, the progress record or a local upload source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport-level failure reported by the network collaborator.
    #[error("Network error: {0}")]
    Network(String),

    /// The persisted progress record is truncated or holds impossible values.
    #[error("Corrupt progress record: {0}")]
    CorruptRecord(String),

    /// A control call was made in a state that does not allow it.
    #[error("Cannot {action} while transfer is {state}")]
    InvalidState {
        /// The rejected operation.
        action: &'static str,
        /// The state the engine was in.
        state: crate::TransferState,
    },

    /// The transfer was cancelled and its artifacts removed.
    #[error("Transfer cancelled")]
    Cancelled,

    /// A segment task ended without reporting a result.
    #[error("Download error: {0}")]
    Download(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The completed file does not match the expected digest.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest the caller asked for.
        expected: String,
        /// Digest of the bytes on disk.
        actual: String,
    },
}

impl Error {
    /// Returns true for failures that came from the network side of a transfer.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Network(_))
    }
}

/// A specialized `Result` type for segfetch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_classification() {
        assert!(Error::Network("reset".into()).is_network());
        assert!(!Error::CorruptRecord("short".into()).is_network());
        assert!(!Error::Io(std::io::Error::other("disk")).is_network());
    }

    #[test]
    fn invalid_state_message() {
        let err = Error::InvalidState {
            action: "pause",
            state: crate::TransferState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot pause while transfer is idle");
    }
}
