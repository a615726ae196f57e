//! reqwest-backed [`Transport`].
//!
//! The client is created once per run and shared by every worker so that
//! connections to the same host are pooled.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::BoxError;
use super::transport::{FetchRequest, FetchResponse, Transport};
use crate::user_agent;

/// HTTP client for mirror downloads.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default timeouts (30s connect, 5min read).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend or system
    /// configuration cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values, in seconds.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, BoxError> {
        debug!(url = %request.url, "sending request");
        let response = self
            .client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        debug!(url = %request.url, status, content_length, "response received");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(BoxError::from))
            .boxed();

        Ok(FetchResponse {
            status,
            content_length,
            body,
        })
    }
}
