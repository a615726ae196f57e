//! Error types for the download module.
//!
//! Every per-item error names the URL being fetched and the output path it
//! was going to, so a failure in a large batch can be traced to its file.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by a [`Transport`](super::Transport).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while processing one download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The transport failed to produce a response or a body chunk.
    #[error("transport error downloading {url} to {path}: {source}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// The output path.
        path: PathBuf,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} downloading {url} to {path}")]
    HttpStatus {
        /// The URL being fetched.
        url: String,
        /// The output path.
        path: PathBuf,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while creating, writing or renaming the output.
    #[error("IO error writing {url} to {path}: {source}")]
    Io {
        /// The URL being fetched.
        url: String,
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The output device ran out of space. Cancels the whole batch.
    #[error("no space left writing {url} to {path}: {source}")]
    NoSpace {
        /// The URL being fetched.
        url: String,
        /// The file path being written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The content does not hash to the digest recorded for it.
    #[error("checksum mismatch for {url} ({path}): expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The URL being fetched.
        url: String,
        /// The output path.
        path: PathBuf,
        /// Recorded digest.
        expected: String,
        /// Digest of the received content.
        actual: String,
    },

    /// Fewer or more bytes arrived than the server advertised.
    #[error("size mismatch for {url} ({path}): expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The URL being fetched.
        url: String,
        /// The output path.
        path: PathBuf,
        /// Advertised content length.
        expected: u64,
        /// Bytes received.
        actual: u64,
    },

    /// The transfer was cancelled before it finished.
    #[error("download of {url} to {path} cancelled")]
    Cancelled {
        /// The URL being fetched.
        url: String,
        /// The output path.
        path: PathBuf,
    },
}

impl DownloadError {
    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, path: impl Into<PathBuf>, source: BoxError) -> Self {
        Self::Transport {
            url: url.into(),
            path: path.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, path: impl Into<PathBuf>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            path: path.into(),
            status,
        }
    }

    /// Creates an IO error, or [`DownloadError::NoSpace`] when the device is full.
    pub fn io(url: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let (url, path) = (url.into(), path.into());
        if is_storage_full(&source) {
            Self::NoSpace { url, path, source }
        } else {
            Self::Io { url, path, source }
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            url: url.into(),
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a size mismatch error.
    pub fn size_mismatch(
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        expected: u64,
        actual: u64,
    ) -> Self {
        Self::SizeMismatch {
            url: url.into(),
            path: path.into(),
            expected,
            actual,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Cancelled {
            url: url.into(),
            path: path.into(),
        }
    }

    /// Whether this error means the output device is full.
    #[must_use]
    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::NoSpace { .. })
    }

    /// The URL the failed item was fetching.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::Io { url, .. }
            | Self::NoSpace { url, .. }
            | Self::ChecksumMismatch { url, .. }
            | Self::SizeMismatch { url, .. }
            | Self::Cancelled { url, .. } => url,
        }
    }

    /// The output path of the failed item.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Transport { path, .. }
            | Self::HttpStatus { path, .. }
            | Self::Io { path, .. }
            | Self::NoSpace { path, .. }
            | Self::ChecksumMismatch { path, .. }
            | Self::SizeMismatch { path, .. }
            | Self::Cancelled { path, .. } => path,
        }
    }
}

// std maps ENOSPC to `StorageFull`.
fn is_storage_full(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::StorageFull
}

// No `From<std::io::Error>` or `From<reqwest::Error>`: every variant needs the
// URL and output path, which the source errors do not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_io_maps_storage_full_to_no_space() {
        let error = DownloadError::io(
            "https://h/a",
            "/out/h/a",
            io::Error::from(io::ErrorKind::StorageFull),
        );
        assert!(error.is_no_space());
        assert_eq!(error.url(), "https://h/a");
    }

    #[test]
    fn test_io_keeps_other_errors() {
        let error = DownloadError::io(
            "https://h/a",
            "/out/h/a",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(error, DownloadError::Io { .. }));
        assert!(!error.is_no_space());
    }

    #[test]
    fn test_http_status_display() {
        let msg = DownloadError::http_status("https://h/a", "/out/h/a", 404).to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://h/a"), "Expected URL in: {msg}");
        assert!(msg.contains("/out/h/a"), "Expected path in: {msg}");
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let error = DownloadError::checksum_mismatch("https://h/a", "/out/h/a", "aa", "bb");
        let msg = error.to_string();
        assert!(msg.contains("expected aa"));
        assert!(msg.contains("got bb"));
        assert_eq!(error.path(), std::path::Path::new("/out/h/a"));
    }
}
