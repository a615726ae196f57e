//! Constants for the download module.

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Suffix of the temporary file a transfer streams into.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Write buffer in front of the output file.
pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;
