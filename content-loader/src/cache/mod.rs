//! Persistent read-through resource cache.
//!
//! A [`DataStore`] is a named cache with an asynchronous lifecycle. Once
//! ready, it hands out [`ResourceRequest`]s that check the backend first,
//! fall back to a [`Transport`](crate::transport::Transport) on a miss, and
//! write fetched bytes back best-effort.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  open()   ┌────────────────┐
//! │  DataStore   │──────────►│ StorageFactory │ (memory, disk)
//! └──────┬───────┘           └───────┬────────┘
//!        │ create_request()          │ OpenOutcome
//!        ▼                           ▼
//! ┌──────────────────┐  read/write ┌────────────────┐
//! │ ResourceRequest  │────────────►│ StorageBackend │
//! └──────┬───────────┘             └────────────────┘
//!        │ miss
//!        ▼
//!    Transport
//! ```

pub mod providers;
mod record;
mod request;
mod store;
mod traits;

pub use providers::{DiskBackendFactory, MemoryBackendFactory};
pub use record::CacheRecord;
pub use request::{RequestEvent, ResourceRequest};
pub use store::{CacheState, DataStore, StoreEvent};
pub use traits::{
    BoxFuture, CacheError, CacheResult, OpenOutcome, StorageBackend, StorageFactory,
    SCHEMA_VERSION,
};
