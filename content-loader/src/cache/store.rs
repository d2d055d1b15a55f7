//! Named cache with an asynchronous lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Closed ──open()──► Opening ──► Ready ──close()──► Closing ──► Closed
//!                       │
//!                       └── open failed ──► Closed (+ StoreEvent::Error)
//! ```
//!
//! Opening a store whose schema version differs from [`SCHEMA_VERSION`]
//! recreates its tables before it becomes ready.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::record::CacheRecord;
use super::request::ResourceRequest;
use super::traits::{CacheError, CacheResult, StorageBackend, StorageFactory, SCHEMA_VERSION};
use crate::emitter::Emitter;
use crate::transport::Transport;

/// Lifecycle state of a [`DataStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Closed,
    Opening,
    Ready,
    Closing,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheState::Closed => "closed",
            CacheState::Opening => "opening",
            CacheState::Ready => "ready",
            CacheState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Ready { name: String },
    /// The backend could not be opened. Carries the backend's message.
    Error { name: String, message: String },
    /// Published before the backend handle is released.
    Closing { name: String },
}

/// A named persistent cache.
pub struct DataStore {
    name: String,
    state: RwLock<CacheState>,
    backend: RwLock<Option<Arc<dyn StorageBackend>>>,
    events: Emitter<StoreEvent>,
}

impl DataStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(CacheState::Closed),
            backend: RwLock::new(None),
            events: Emitter::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CacheState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == CacheState::Ready
    }

    pub fn events(&self) -> &Emitter<StoreEvent> {
        &self.events
    }

    /// Open the backend through `factory`.
    ///
    /// Calling this on a store that is already ready is a no-op. Opening
    /// while another transition is in progress fails with
    /// [`CacheError::Backend`].
    pub async fn open(&self, factory: &dyn StorageFactory) -> CacheResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                CacheState::Ready => return Ok(()),
                CacheState::Closed => *state = CacheState::Opening,
                other => {
                    return Err(CacheError::Backend(format!(
                        "cache {} is {}",
                        self.name, other
                    )))
                }
            }
        }
        debug!(cache = %self.name, "opening cache");

        let backend = match self.establish(factory).await {
            Ok(backend) => backend,
            Err(e) => {
                *self.state.write() = CacheState::Closed;
                warn!(cache = %self.name, error = %e, "failed to open cache");
                self.events.publish(&StoreEvent::Error {
                    name: self.name.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        *self.backend.write() = Some(backend);
        *self.state.write() = CacheState::Ready;
        info!(cache = %self.name, "cache ready");
        self.events.publish(&StoreEvent::Ready {
            name: self.name.clone(),
        });
        Ok(())
    }

    async fn establish(&self, factory: &dyn StorageFactory) -> CacheResult<Arc<dyn StorageBackend>> {
        let outcome = factory.open(&self.name).await?;
        if outcome.schema_version != Some(SCHEMA_VERSION) {
            info!(
                cache = %self.name,
                found = ?outcome.schema_version,
                expected = SCHEMA_VERSION,
                "creating cache tables"
            );
            if let Err(e) = outcome.backend.create_tables().await {
                outcome.backend.close().await;
                return Err(e);
            }
        }
        Ok(outcome.backend)
    }

    /// Close a ready store.
    ///
    /// Publishes [`StoreEvent::Closing`] before releasing the backend.
    /// Requests already running keep their own backend handle and are not
    /// cancelled. Returns `false` if the store was not ready.
    pub async fn close(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state != CacheState::Ready {
                return false;
            }
            *state = CacheState::Closing;
        }

        self.events.publish(&StoreEvent::Closing {
            name: self.name.clone(),
        });

        let backend = self.backend.write().take();
        if let Some(backend) = backend {
            backend.close().await;
        }

        *self.state.write() = CacheState::Closed;
        info!(cache = %self.name, "cache closed");
        true
    }

    /// Backend handle of a ready store.
    pub fn backend(&self) -> CacheResult<Arc<dyn StorageBackend>> {
        if !self.is_ready() {
            return Err(CacheError::NotReady(self.name.clone()));
        }
        self.backend
            .read()
            .clone()
            .ok_or_else(|| CacheError::NotReady(self.name.clone()))
    }

    /// Create a read-through request for `key` fetched from `url`.
    pub fn create_request(
        &self,
        key: &str,
        url: &str,
        resource_type: &str,
        transport: Arc<dyn Transport>,
    ) -> CacheResult<ResourceRequest> {
        let backend = self.backend()?;
        Ok(ResourceRequest::new(
            key,
            url,
            resource_type,
            backend,
            transport,
        ))
    }

    /// Store bytes directly.
    pub async fn put(&self, key: &str, resource_type: &str, data: Bytes) -> CacheResult<CacheRecord> {
        let backend = self.backend()?;
        let record = CacheRecord::new(key, resource_type, data.len() as u64);
        backend.write(record.clone(), data).await?;
        Ok(record)
    }

    /// Read stored bytes directly.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.backend()?.read(key).await
    }

    /// Read the metadata row for `key`.
    pub async fn record(&self, key: &str) -> CacheResult<Option<CacheRecord>> {
        self.backend()?.read_record(key).await
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::providers::MemoryBackendFactory;
    use parking_lot::Mutex;

    fn record_events(store: &DataStore) -> Arc<Mutex<Vec<StoreEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        store.events().subscribe(move |e| sink.lock().push(e.clone()));
        events
    }

    #[tokio::test]
    async fn test_open_and_close_lifecycle() {
        let factory = MemoryBackendFactory::new();
        let store = DataStore::new("game");
        let events = record_events(&store);

        assert_eq!(store.state(), CacheState::Closed);
        store.open(&factory).await.unwrap();
        assert_eq!(store.state(), CacheState::Ready);

        assert!(store.close().await);
        assert_eq!(store.state(), CacheState::Closed);
        assert!(!store.close().await);

        assert_eq!(
            *events.lock(),
            vec![
                StoreEvent::Ready {
                    name: "game".into()
                },
                StoreEvent::Closing {
                    name: "game".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_open_failure_stays_closed() {
        let factory = MemoryBackendFactory::new();
        factory.set_open_failure(true);
        let store = DataStore::new("game");
        let events = record_events(&store);

        assert!(store.open(&factory).await.is_err());
        assert_eq!(store.state(), CacheState::Closed);
        assert!(matches!(events.lock()[0], StoreEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_round_trip_preserves_bytes_and_size() {
        let factory = MemoryBackendFactory::new();
        let store = DataStore::new("game");
        store.open(&factory).await.unwrap();

        let data = Bytes::from_static(b"\x00\x01binary\xff");
        store.put("k", "bytes", data.clone()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(data.clone()));
        let record = store.record("k").await.unwrap().unwrap();
        assert_eq!(record.size, data.len() as u64);
    }

    #[tokio::test]
    async fn test_not_ready_operations_fail() {
        let store = DataStore::new("game");
        assert!(matches!(store.get("k").await, Err(CacheError::NotReady(_))));
        let transport = Arc::new(crate::transport::MockTransport::new());
        assert!(store.create_request("k", "u", "bytes", transport).is_err());
    }

    #[tokio::test]
    async fn test_schema_mismatch_recreates_tables() {
        let factory = MemoryBackendFactory::new();
        let store = DataStore::new("game");
        store.open(&factory).await.unwrap();
        store
            .put("k", "bytes", Bytes::from_static(b"v"))
            .await
            .unwrap();
        store.close().await;

        // Reopen with a matching version keeps data
        store.open(&factory).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        store.close().await;

        factory.set_schema_version("game", Some(0));
        store.open(&factory).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
