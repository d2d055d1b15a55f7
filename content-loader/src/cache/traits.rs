//! Core traits for persistent resource storage.
//!
//! A [`StorageFactory`] opens named stores; each open store is a
//! [`StorageBackend`] holding two logical tables keyed by resource name:
//! a metadata table of [`CacheRecord`]s and a raw-bytes table.
//!
//! # Consistency
//!
//! Backends must write a record and its payload as one unit. After a failed
//! write, either both the previous record and payload remain or neither
//! exists; a payload is never readable without its metadata row.
//!
//! # Dyn Compatibility
//!
//! Async methods return [`BoxFuture`] so backends can be held as
//! `Arc<dyn StorageBackend>` and swapped at runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::record::CacheRecord;

/// Schema version written by [`StorageBackend::create_tables`].
///
/// Opening a store that reports any other version recreates its tables.
pub const SCHEMA_VERSION: u32 = 1;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error from a disk-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a cache that is not in the ready state.
    #[error("Cache {0} is not ready.")]
    NotReady(String),

    /// The backend handle was closed.
    #[error("Cache backend is closed")]
    Closed,

    /// Backend-specific failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Metadata could not be encoded or decoded.
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// An open persistent store.
pub trait StorageBackend: Send + Sync {
    /// Name of the store.
    fn name(&self) -> &str;

    /// Read the payload stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    fn read(&self, key: &str) -> BoxFuture<'_, CacheResult<Option<Bytes>>>;

    /// Read the metadata row for `key`.
    fn read_record(&self, key: &str) -> BoxFuture<'_, CacheResult<Option<CacheRecord>>>;

    /// Store a metadata row and payload atomically, replacing any previous
    /// value under the same key.
    fn write(&self, record: CacheRecord, data: Bytes) -> BoxFuture<'_, CacheResult<()>>;

    /// Delete a key from both tables.
    ///
    /// Returns `Ok(false)` if the key was absent.
    fn delete(&self, key: &str) -> BoxFuture<'_, CacheResult<bool>>;

    /// Keys currently present in the metadata table.
    fn keys(&self) -> BoxFuture<'_, CacheResult<Vec<String>>>;

    /// Drop and recreate both tables and record [`SCHEMA_VERSION`].
    fn create_tables(&self) -> BoxFuture<'_, CacheResult<()>>;

    /// Release the handle. Subsequent operations fail with
    /// [`CacheError::Closed`].
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Result of opening a store.
pub struct OpenOutcome {
    pub backend: Arc<dyn StorageBackend>,
    /// Schema version found in the store, `None` for a new store.
    pub schema_version: Option<u32>,
}

/// Opens and destroys named stores.
pub trait StorageFactory: Send + Sync {
    /// Open (creating if needed) the store called `name`.
    fn open(&self, name: &str) -> BoxFuture<'_, CacheResult<OpenOutcome>>;

    /// Remove the store called `name` and everything in it.
    fn destroy(&self, name: &str) -> BoxFuture<'_, CacheResult<()>>;
}
