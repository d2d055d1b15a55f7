//! Content Loader - versioned content delivery for games and applications
//!
//! This library downloads archive packages from one of several content
//! origins, caches them persistently so repeat launches avoid the network,
//! and unpacks them into runtime objects in small time slices so the host's
//! main loop never stalls.
//!
//! # Layers
//!
//! ```text
//! loader      manifest, package groups, time-sliced unpacking
//!   │
//! backend     in-process or worker-thread execution
//!   │
//! server      commands/events, origin load balancing
//!   │
//! cache       read-through stores (memory, disk)
//!   │
//! transport   byte fetch (HTTP, mock)
//!
//! archive     ustar decoding used by the loader
//! ```
//!
//! # High-Level API
//!
//! ```ignore
//! use content_loader::config::LoaderConfig;
//! use content_loader::loader::{ContentLoader, ContentSet, ServerContext};
//!
//! let config = LoaderConfig::new("game")
//!     .with_platform("linux")
//!     .with_servers(["https://cdn.example.com/content"]);
//! let mut loader: ContentLoader = ContentLoader::from_config(
//!     &config,
//!     ServerContext::from_config(&config)?,
//! )?;
//!
//! // once per frame
//! loader.update(Duration::from_millis(4), &mut ());
//! ```

pub mod archive;
pub mod backend;
pub mod cache;
pub mod config;
pub mod emitter;
pub mod loader;
pub mod logging;
pub mod server;
pub mod transport;

/// Version of the content loader library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
