//! Storage backend implementations.
//!
//! # Available Providers
//!
//! - [`MemoryBackendFactory`]: process-lifetime stores backed by moka
//! - [`DiskBackendFactory`]: a directory per store with metadata and payload
//!   tables

mod disk;
mod memory;

pub use disk::{DiskBackend, DiskBackendFactory};
pub use memory::{MemoryBackend, MemoryBackendFactory};
