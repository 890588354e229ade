//! SHA-256 verification of completed transfers.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Computes the lowercase hex SHA-256 of the file at `path`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks the file at `path` against an expected hex digest (case-insensitive).
///
/// # Errors
///
/// Returns [`Error::ChecksumMismatch`] if the digests differ.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(sha256_file(&path).await.unwrap(), ABC_SHA256);
        verify_sha256(&path, &ABC_SHA256.to_uppercase()).await.unwrap();
    }

    #[tokio::test]
    async fn mismatch_reports_both_digests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abd").unwrap();

        match verify_sha256(&path, ABC_SHA256).await {
            Err(Error::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, ABC_SHA256);
                assert_ne!(actual, ABC_SHA256);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
