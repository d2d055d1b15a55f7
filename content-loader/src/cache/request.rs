//! Read-through fetch of a single resource.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::record::CacheRecord;
use super::traits::StorageBackend;
use crate::emitter::Emitter;
use crate::transport::{TransferProgress, Transport, TransportError};

/// Notifications raised while a request runs.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// Network transfer progress. Not raised for cache hits.
    Progress(TransferProgress),
    /// The resource bytes, from the cache or the network.
    Data(Bytes),
    /// The transport failed.
    Error(String),
}

/// One read-through fetch against an open cache.
///
/// Subscribe to [`events`](Self::events) before calling
/// [`start`](Self::start). Exactly one of [`RequestEvent::Data`] or
/// [`RequestEvent::Error`] is published per request.
pub struct ResourceRequest {
    key: String,
    url: String,
    resource_type: String,
    backend: Arc<dyn StorageBackend>,
    transport: Arc<dyn Transport>,
    events: Emitter<RequestEvent>,
}

impl ResourceRequest {
    pub fn new(
        key: impl Into<String>,
        url: impl Into<String>,
        resource_type: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            resource_type: resource_type.into(),
            backend,
            transport,
            events: Emitter::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn events(&self) -> &Emitter<RequestEvent> {
        &self.events
    }

    /// Run the fetch.
    ///
    /// With `check_cache`, a stored payload is delivered without touching the
    /// network. Misses and cache read errors fall through to the transport.
    /// Fetched bytes are written back best-effort: a failed write is logged
    /// and the data is still delivered. Transport errors are not retried.
    pub async fn start(self, check_cache: bool) -> Result<Bytes, TransportError> {
        if check_cache {
            match self.backend.read(&self.key).await {
                Ok(Some(data)) => {
                    debug!(key = %self.key, bytes = data.len(), "cache hit");
                    self.events.publish(&RequestEvent::Data(data.clone()));
                    return Ok(data);
                }
                Ok(None) => debug!(key = %self.key, "cache miss"),
                Err(e) => warn!(key = %self.key, error = %e, "cache read failed, fetching"),
            }
        }

        let events = &self.events;
        let mut on_progress = |progress: TransferProgress| {
            events.publish(&RequestEvent::Progress(progress));
        };

        let data = match self.transport.fetch(&self.url, &mut on_progress).await {
            Ok(data) => data,
            Err(e) => {
                debug!(url = %self.url, error = %e, "fetch failed");
                self.events.publish(&RequestEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let record = CacheRecord::new(&self.key, &self.resource_type, data.len() as u64);
        if let Err(e) = self.backend.write(record, data.clone()).await {
            warn!(key = %self.key, error = %e, "cache write-back failed");
        }

        self.events.publish(&RequestEvent::Data(data.clone()));
        Ok(data)
    }
}
