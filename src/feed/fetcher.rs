//! HTTP retrieval of raw feed bytes.
//!
//! The fetcher applies a bounded total timeout and a small redirect limit,
//! and treats any non-2xx response as an error. It deliberately does not
//! retry: retry policy belongs to the scheduler, which simply tries again
//! at the subscription's next cron tick.

use std::time::Duration;

use thiserror::Error;

/// Redirects followed transparently before giving up.
const MAX_REDIRECTS: usize = 5;

/// Response bodies beyond this are rejected rather than buffered.
const MAX_FEED_SIZE: usize = 8 * 1024 * 1024; // 8 MiB

/// Errors that can occur while retrieving feed bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// HTTP response with a non-2xx status code.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response body exceeded the size limit.
    #[error("response too large")]
    ResponseTooLarge,
}

/// HTTP fetcher for feed documents.
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedFetcher {
    /// Builds a fetcher with the given User-Agent and total request timeout.
    pub fn new(user_agent: &str, timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Retrieves the raw bytes behind `url`.
    ///
    /// The timeout covers the whole exchange, headers and body both; a
    /// fetch that exceeds it is abandoned and reported as
    /// [`FetchError::Timeout`].
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tokio::time::timeout(self.timeout, self.fetch_inner(url))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn fetch_inner(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_FEED_SIZE {
                return Err(FetchError::ResponseTooLarge);
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_FEED_SIZE {
            return Err(FetchError::ResponseTooLarge);
        }

        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================
