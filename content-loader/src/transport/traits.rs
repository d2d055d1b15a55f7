//! Byte-fetch transport interface.

use bytes::Bytes;
use thiserror::Error;

use crate::cache::BoxFuture;

/// Bytes received so far for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    /// Total length, when the transport can compute it.
    pub total: Option<u64>,
}

/// Percentage reported while the total length is unknown.
pub const INDETERMINATE_PERCENT: u8 = 99;

impl TransferProgress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    /// Completion percentage.
    ///
    /// `floor(loaded * 100 / total)`, capped at 100. Without a usable total
    /// this is [`INDETERMINATE_PERCENT`] so indicators never show completion
    /// before the data arrives.
    pub fn percent(&self) -> u8 {
        match self.total {
            Some(total) if total > 0 => {
                let percent = (self.loaded as u128 * 100) / total as u128;
                percent.min(100) as u8
            }
            _ => INDETERMINATE_PERCENT,
        }
    }
}

/// Errors surfaced by a transport. Not retried by the core.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Server answered with a non-success status.
    #[error("{url}: HTTP {status} {reason}")]
    Status {
        url: String,
        status: u16,
        reason: String,
    },

    /// Request could not be sent or the connection failed.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Body could not be read.
    #[error("reading body of {url} failed: {message}")]
    Body { url: String, message: String },
}

/// Fetches the bytes behind a URL, reporting progress as they arrive.
pub trait Transport: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        progress: &'a mut (dyn FnMut(TransferProgress) + Send + 'a),
    ) -> BoxFuture<'a, Result<Bytes, TransportError>>;
}
