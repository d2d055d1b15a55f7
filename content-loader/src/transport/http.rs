//! HTTP transport using reqwest.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::debug;

use super::traits::{TransferProgress, Transport, TransportError};
use crate::cache::BoxFuture;

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Upper bound on the body buffer reserved from `Content-Length`.
const MAX_PREALLOCATE: u64 = 8 << 20;

/// Async HTTP transport.
///
/// Streams the response body chunk by chunk, reporting progress with the
/// `Content-Length` total when the server sends one.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(
        &self,
        url: &str,
        progress: &mut (dyn FnMut(TransferProgress) + Send + '_),
    ) -> Result<Bytes, TransportError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let total = response.content_length();
        // The header is untrusted; the buffer grows as chunks arrive.
        let reserve = total.map_or(0, |t| t.min(MAX_PREALLOCATE));
        let mut body = BytesMut::with_capacity(reserve as usize);

        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                }
            } else {
                TransportError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })? {
            body.extend_from_slice(&chunk);
            progress(TransferProgress::new(body.len() as u64, total));
        }

        debug!(url = %url, bytes = body.len(), "HTTP fetch complete");
        Ok(body.freeze())
    }
}

fn map_request_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

impl Transport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        progress: &'a mut (dyn FnMut(TransferProgress) + Send + 'a),
    ) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        Box::pin(self.get(url, progress))
    }
}
