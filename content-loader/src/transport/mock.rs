//! In-process transport serving canned responses.
//!
//! Used by tests and demos in place of a network. Responses are keyed by the
//! full URL; unknown URLs answer with HTTP 404. Fetches can be held back with
//! [`MockTransport::pause`] to observe in-flight state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::trace;

use super::traits::{TransferProgress, Transport, TransportError};
use crate::cache::BoxFuture;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum MockResponse {
    Data(Bytes),
    Error(TransportError),
}

/// Canned-response transport with call counting.
#[derive(Debug)]
pub struct MockTransport {
    responses: DashMap<String, MockResponse>,
    calls: DashMap<String, usize>,
    paused: watch::Sender<bool>,
    chunk_size: AtomicUsize,
    report_length: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            responses: DashMap::new(),
            calls: DashMap::new(),
            paused,
            chunk_size: AtomicUsize::new(DEFAULT_CHUNK_SIZE),
            report_length: AtomicBool::new(true),
        }
    }

    /// Serve `data` for `url`.
    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.responses
            .insert(url.into(), MockResponse::Data(data.into()));
    }

    /// Fail fetches of `url` with `error`.
    pub fn insert_error(&self, url: impl Into<String>, error: TransportError) {
        self.responses.insert(url.into(), MockResponse::Error(error));
    }

    pub fn remove(&self, url: &str) {
        self.responses.remove(url);
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls.get(url).map(|c| *c).unwrap_or(0)
    }

    /// Number of fetches issued for any URL.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Hold every fetch (new and in-progress) before it produces data.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Release held fetches.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Size of the chunks progress is reported in.
    pub fn set_chunk_size(&self, size: usize) {
        self.chunk_size.store(size.max(1), Ordering::Relaxed);
    }

    /// When `false`, progress reports carry no total length.
    pub fn set_report_length(&self, report: bool) {
        self.report_length.store(report, Ordering::Relaxed);
    }

    async fn serve(
        &self,
        url: &str,
        progress: &mut (dyn FnMut(TransferProgress) + Send + '_),
    ) -> Result<Bytes, TransportError> {
        *self.calls.entry(url.to_string()).or_insert(0) += 1;

        let mut paused = self.paused.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = paused.wait_for(|held| !*held).await;

        let response = self.responses.get(url).map(|r| r.value().clone());
        match response {
            Some(MockResponse::Data(data)) => {
                let total = self
                    .report_length
                    .load(Ordering::Relaxed)
                    .then_some(data.len() as u64);
                let chunk_size = self.chunk_size.load(Ordering::Relaxed);

                let mut loaded = 0usize;
                while loaded < data.len() {
                    loaded = (loaded + chunk_size).min(data.len());
                    progress(TransferProgress::new(loaded as u64, total));
                }
                trace!(url = %url, bytes = data.len(), "mock fetch served");
                Ok(data)
            }
            Some(MockResponse::Error(error)) => Err(error),
            None => Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
                reason: "Not Found".to_string(),
            }),
        }
    }
}

impl Transport for MockTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        progress: &'a mut (dyn FnMut(TransferProgress) + Send + 'a),
    ) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        Box::pin(self.serve(url, progress))
    }
}
