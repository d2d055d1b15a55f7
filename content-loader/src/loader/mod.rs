//! Manifest-driven package loading and time-sliced unpacking.
//!
//! # Overview
//!
//! A [`ContentLoader`] fetches the application manifest, requests groups of
//! packages through a content backend and unpacks the downloaded archives
//! one step at a time:
//!
//! - **ParseArchive**: decode the archive and its `package.manifest`
//! - **LoadResources**: hand one resource to its [`Materializer`] per step
//! - **Complete** / **Error**: terminal
//!
//! When every package of a group is complete the loader publishes
//! [`LoaderEvent::GroupReady`] with the group's [`ContentSet`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use content_loader::cache::MemoryBackendFactory;
//! use content_loader::loader::{ContentLoader, ContentSet, LoaderEvent, ServerContext};
//! use content_loader::transport::HttpTransport;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let context = ServerContext::new(
//!     Arc::new(HttpTransport::new()?),
//!     Arc::new(MemoryBackendFactory::new()),
//! );
//! let mut loader: ContentLoader = ContentLoader::new("game", "linux", "latest", context);
//! loader.events().subscribe(|event| {
//!     if let LoaderEvent::GroupReady { group, .. } = event {
//!         println!("{group} ready");
//!     }
//! });
//! loader.connect(false)?;
//! loader.open_cache("game")?;
//! loader.add_server("https://cdn.example.com/content")?;
//!
//! let set = ContentSet::new();
//! loop {
//!     loader.update(Duration::from_millis(4), &mut ());
//!     if loader.manifest().is_some() && loader.group("level01").is_none() {
//!         loader.load_package_group("level01", set.clone(), &["core", "level01"])?;
//!     }
//!     if loader.has_fully_loaded("level01") {
//!         break;
//!     }
//!     tokio::time::sleep(Duration::from_millis(16)).await;
//! }
//! # Ok(())
//! # }
//! ```

mod clock;
mod content_loader;
mod content_set;
mod error;
mod manifest;
mod materializer;
mod package;

pub use clock::{Clock, ManualClock, SystemClock};
pub use content_loader::{
    create_loader, ContentLoader, LoaderEvent, ServerContext, MANIFEST_REQUEST_ID,
};
pub use content_set::ContentSet;
pub use error::{LoaderError, LoaderResult, MaterializerError};
pub use manifest::{
    file_with_extension, load_object, ApplicationManifest, PackageEntry, PackageManifest,
    ResourceMetadata, PACKAGE_MANIFEST,
};
pub use materializer::{MaterializeRequest, Materializer};
pub use package::{PackageRecord, UnpackState};
