//! Streaming integrity tracking for bytes in transit.
//!
//! [`HashingWriter`] and [`HashingReader`] wrap a tokio stream and keep a
//! running SHA-256 digest plus byte count of everything that passes through
//! them. The running values can be read at any point without ending the
//! stream, which lets the download engine compute a digest while writing and
//! lets the "already downloaded" check re-hash an existing file.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// Running SHA-256 digest and byte count.
#[derive(Debug, Clone, Default)]
pub struct IntegrityTracker {
    hasher: Sha256,
    size: u64,
}

impl IntegrityTracker {
    /// Creates a tracker with an empty digest and zero size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    /// Hex-encoded digest of everything seen so far.
    #[must_use]
    pub fn current_hash(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Number of bytes seen so far.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.size
    }
}

/// An [`AsyncWrite`] decorator that hashes every byte accepted by the inner writer.
///
/// Only the bytes the inner writer reports as written are hashed, so a short
/// write never desynchronizes the digest from the data on disk.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    tracker: IntegrityTracker,
}

impl<W> HashingWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            tracker: IntegrityTracker::new(),
        }
    }

    /// Hex-encoded digest of the bytes written so far.
    #[must_use]
    pub fn current_hash(&self) -> String {
        self.tracker.current_hash()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.tracker.current_size()
    }

    /// Returns a reference to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns a mutable reference to the wrapped writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwraps the writer, discarding the running digest.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.tracker.update(&buf[..written]);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// An [`AsyncRead`] decorator that hashes every byte read from the inner reader.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    tracker: IntegrityTracker,
}

impl<R> HashingReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            tracker: IntegrityTracker::new(),
        }
    }

    /// Hex-encoded digest of the bytes read so far.
    #[must_use]
    pub fn current_hash(&self) -> String {
        self.tracker.current_hash()
    }

    /// Number of bytes read so far.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.tracker.current_size()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            this.tracker.update(&buf.filled()[before..]);
        }
        result
    }
}

/// Result of re-hashing a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Hex-encoded SHA-256 of the file contents.
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
}

/// Streams the file at `path` through a [`HashingReader`].
///
/// # Errors
///
/// Returns any IO error from opening or reading the file.
pub async fn digest_file(path: &Path) -> io::Result<FileDigest> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = HashingReader::new(file);
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(FileDigest {
        sha256: reader.current_hash(),
        size: reader.current_size(),
    })
}

/// Returns the file digest when the file at `path` hashes to `expected`.
///
/// A missing or unreadable file is not an error here: it simply does not
/// match, and the caller re-fetches it.
pub async fn file_matches_digest(path: &Path, expected: &str) -> Option<FileDigest> {
    match digest_file(path).await {
        Ok(digest) if digest.sha256.eq_ignore_ascii_case(expected) => Some(digest),
        Ok(digest) => {
            debug!(
                path = %path.display(),
                expected,
                actual = %digest.sha256,
                "on-disk digest mismatch"
            );
            None
        }
        Err(error) => {
            debug!(path = %path.display(), error = %error, "on-disk file not verifiable");
            None
        }
    }
}
