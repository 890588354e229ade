//! File system abstraction for testability.

use async_trait::async_trait;
use std::path::Path;

/// Abstraction over file system operations for testability.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Checks if a file exists at the given path.
    async fn file_exists(&self, path: &Path) -> bool;

    /// Returns the size of a file if it exists.
    async fn file_size(&self, path: &Path) -> Option<u64>;

    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Creates (or truncates) a read-write file and sets its length to `size`.
    async fn create_file(&self, path: &Path, size: u64) -> std::io::Result<tokio::fs::File>;

    /// Opens an existing file for random read-write access.
    async fn open_file(&self, path: &Path) -> std::io::Result<tokio::fs::File>;

    /// Removes a file. A missing file is not an error.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn file_size(&self, path: &Path) -> Option<u64> {
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path, size: u64) -> std::io::Result<tokio::fs::File> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.set_len(size).await?;
        Ok(file)
    }

    async fn open_file(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn tokio_fs_file_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::File::create(&path).unwrap();

        let fs = TokioFileSystem::new();
        assert!(fs.file_exists(&path).await);
        assert!(!fs.file_exists(&dir.path().join("nonexistent.txt")).await);
    }

    #[tokio::test]
    async fn tokio_fs_file_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"hello").unwrap();

        let fs = TokioFileSystem::new();
        assert_eq!(fs.file_size(&path).await, Some(5));
        assert_eq!(fs.file_size(&dir.path().join("nonexistent.txt")).await, None);
    }

    #[tokio::test]
    async fn tokio_fs_create_file_presizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, b"stale contents that are longer").unwrap();

        let fs = TokioFileSystem::new();
        let _file = fs.create_file(&path, 1024).await.unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 1024);
        assert!(contents.iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn tokio_fs_open_file_requires_existing() {
        let dir = TempDir::new().unwrap();
        let fs = TokioFileSystem::new();
        assert!(fs.open_file(&dir.path().join("missing")).await.is_err());

        let path = dir.path().join("present");
        std::fs::write(&path, b"abc").unwrap();
        assert!(fs.open_file(&path).await.is_ok());
    }

    #[tokio::test]
    async fn tokio_fs_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let fs = TokioFileSystem::new();
        let path = dir.path().join("gone");
        fs.remove_file(&path).await.unwrap();

        std::fs::write(&path, b"x").unwrap();
        fs.remove_file(&path).await.unwrap();
        assert!(!path.exists());
    }
}
