//! The request/response seam between the engine and the network.
//!
//! The engine issues exactly one GET per item through a [`Transport`] and
//! never looks at anything but the status, the advertised length and the
//! body stream. [`HttpClient`](super::HttpClient) is the reqwest-backed
//! implementation; tests substitute their own.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::bytes::Bytes;

use super::error::BoxError;

/// One outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute URL to fetch.
    pub url: String,
    /// User-Agent header value.
    pub user_agent: String,
}

/// A response whose body has not been read yet.
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length` as advertised by the server.
    pub content_length: Option<u64>,
    /// Body chunks.
    pub body: BoxStream<'static, Result<Bytes, BoxError>>,
}

impl FetchResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Performs a single GET on behalf of the engine.
///
/// Dropping the returned future, or the response body, must abort the
/// transfer: the engine relies on this to cancel in-flight items.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response head plus a body stream.
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, BoxError>;
}
