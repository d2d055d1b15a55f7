//! In-memory storage backend using moka.
//!
//! Stores live for the lifetime of the factory, so closing and reopening a
//! cache by name finds the previous contents. Each table entry holds the
//! metadata row and payload together, which makes every write a single
//! atomic insert.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use moka::future::Cache as MokaCache;
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::record::CacheRecord;
use crate::cache::traits::{
    BoxFuture, CacheError, CacheResult, OpenOutcome, StorageBackend, StorageFactory,
    SCHEMA_VERSION,
};

#[derive(Debug)]
struct StoredResource {
    record: CacheRecord,
    data: Bytes,
}

type Table = MokaCache<String, Arc<StoredResource>>;

fn new_table() -> Table {
    MokaCache::builder().build()
}

struct StoreState {
    table: RwLock<Table>,
    schema_version: RwLock<Option<u32>>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            table: RwLock::new(new_table()),
            schema_version: RwLock::new(None),
        }
    }

    fn table(&self) -> Table {
        self.table.read().clone()
    }
}

/// Factory for in-memory stores.
///
/// Failure toggles let tests exercise open and write-back error paths.
pub struct MemoryBackendFactory {
    stores: DashMap<String, Arc<StoreState>>,
    fail_opens: AtomicBool,
    fail_writes: Arc<AtomicBool>,
}

impl Default for MemoryBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackendFactory {
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
            fail_opens: AtomicBool::new(false),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent opens fail.
    pub fn set_open_failure(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Make writes on every backend from this factory fail.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Override the schema version recorded for a store.
    pub fn set_schema_version(&self, name: &str, version: Option<u32>) {
        let state = self.state(name);
        *state.schema_version.write() = version;
    }

    /// Whether a store called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    fn state(&self, name: &str) -> Arc<StoreState> {
        Arc::clone(
            self.stores
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(StoreState::new()))
                .value(),
        )
    }
}

impl StorageFactory for MemoryBackendFactory {
    fn open(&self, name: &str) -> BoxFuture<'_, CacheResult<OpenOutcome>> {
        let name = name.to_string();
        Box::pin(async move {
            if self.fail_opens.load(Ordering::SeqCst) {
                return Err(CacheError::Backend(format!(
                    "failed to open memory store {}",
                    name
                )));
            }

            let state = self.state(&name);
            let schema_version = *state.schema_version.read();
            debug!(cache = %name, ?schema_version, "opened memory store");

            let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend {
                name,
                state,
                closed: AtomicBool::new(false),
                fail_writes: Arc::clone(&self.fail_writes),
            });
            Ok(OpenOutcome {
                backend,
                schema_version,
            })
        })
    }

    fn destroy(&self, name: &str) -> BoxFuture<'_, CacheResult<()>> {
        let name = name.to_string();
        Box::pin(async move {
            self.stores.remove(&name);
            debug!(cache = %name, "destroyed memory store");
            Ok(())
        })
    }
}

/// Handle to one in-memory store.
pub struct MemoryBackend {
    name: String,
    state: Arc<StoreState>,
    closed: AtomicBool,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    fn table(&self) -> CacheResult<Table> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        Ok(self.state.table())
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, key: &str) -> BoxFuture<'_, CacheResult<Option<Bytes>>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table()?;
            Ok(table.get(&key).await.map(|stored| stored.data.clone()))
        })
    }

    fn read_record(&self, key: &str) -> BoxFuture<'_, CacheResult<Option<CacheRecord>>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table()?;
            Ok(table.get(&key).await.map(|stored| stored.record.clone()))
        })
    }

    fn write(&self, record: CacheRecord, data: Bytes) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            let table = self.table()?;
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CacheError::Backend(format!(
                    "write to {} rejected",
                    self.name
                )));
            }
            let key = record.key.clone();
            table
                .insert(key, Arc::new(StoredResource { record, data }))
                .await;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, CacheResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table()?;
            Ok(table.remove(&key).await.is_some())
        })
    }

    fn keys(&self) -> BoxFuture<'_, CacheResult<Vec<String>>> {
        Box::pin(async move {
            let table = self.table()?;
            let mut keys: Vec<String> = table.iter().map(|(key, _)| (*key).clone()).collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn create_tables(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(CacheError::Closed);
            }
            *self.state.table.write() = new_table();
            *self.state.schema_version.write() = Some(SCHEMA_VERSION);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }
}
