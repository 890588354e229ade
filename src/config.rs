//! Configuration types for transfer operations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plan::DEFAULT_SEGMENT_COUNT;

/// Default size of one read/write piece.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Suffix of the progress record stored next to the target file.
pub const RECORD_SUFFIX: &str = ".temp";

/// Configuration of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Remote resource to fetch.
    pub url: String,
    /// Directory receiving the target file and its progress record.
    pub directory: PathBuf,
    /// Name of the target file inside `directory`.
    pub filename: String,
    /// Number of concurrent segments. Zero selects the default of 3; at most 64 are used.
    pub segment_count: usize,
    /// Size of one read/write piece in bytes.
    pub buffer_size: usize,
    /// Hex SHA-256 the completed file must match.
    pub expected_sha256: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            directory: PathBuf::from("."),
            filename: String::new(),
            segment_count: DEFAULT_SEGMENT_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            expected_sha256: None,
        }
    }
}

impl TransferConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote URL and, if no filename is set yet, derives one from it.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        if self.filename.is_empty()
            && let Some(name) = filename_from_url(&self.url)
        {
            self.filename = name;
        }
        self
    }

    /// Sets the destination directory.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Sets the target filename.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Sets the number of segments.
    #[must_use]
    pub const fn with_segment_count(mut self, count: usize) -> Self {
        self.segment_count = count;
        self
    }

    /// Sets the read/write piece size.
    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Requires the completed file to match a hex SHA-256 digest.
    #[must_use]
    pub fn with_expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }

    /// Path of the target file.
    #[must_use]
    pub fn target_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// Path of the progress record.
    #[must_use]
    pub fn record_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}{RECORD_SUFFIX}", self.filename))
    }

    /// Checks that the configuration describes a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL or filename is missing, or the
    /// filename is not a plain file name.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("url is empty".into()));
        }
        if self.filename.is_empty() {
            return Err(Error::Config("filename is empty".into()));
        }
        if Path::new(&self.filename).file_name() != Some(self.filename.as_ref()) {
            return Err(Error::Config(format!(
                "filename {:?} must not contain a path",
                self.filename
            )));
        }
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be positive".into()));
        }
        Ok(())
    }
}

/// Derives a filename from the last path segment of `url`.
#[must_use]
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .next_back()
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
}

/// Application configuration: defaults applied to every transfer started by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transfer defaults. `url` and `filename` are normally left empty here.
    pub transfer: TransferConfig,
}

impl AppConfig {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("segfetch")
            .join("config.toml")
    }

    /// Loads the configuration from [`default_path`](Self::default_path).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Loads the configuration from `path`, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it is not valid TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}
