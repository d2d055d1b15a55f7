//! Top-level package loader.
//!
//! The [`ContentLoader`] drives everything above the content server:
//!
//! ```text
//!  connect ──► open_cache(app) ──► CacheReady ──► <app>.manifest
//!                                                     │
//!                       process_manifest_value ◄──────┘
//!                                │
//!  load_package_group(group, set, [names]) ──► GetResource per package
//!                                                     │
//!          Progress / ResourceData ◄──────────────────┘
//!                                │
//!                        unpack queue (FIFO)
//!                                │
//!  unpack_resources(budget, ctx): ParseArchive ──► LoadResources ──► Complete
//!                                                        │              │
//!                                               GroupError ◄── Error    └─► GroupReady
//! ```
//!
//! The loader is single-threaded from the host's point of view. Server
//! events are picked up by [`poll_events`](ContentLoader::poll_events) and
//! unpacking happens only inside
//! [`unpack_resources`](ContentLoader::unpack_resources), which returns once
//! its time budget is spent. [`update`](ContentLoader::update) does both and
//! is meant to be called once per frame.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::content_set::ContentSet;
use super::error::{LoaderError, LoaderResult};
use super::manifest::{load_object, ApplicationManifest, PackageManifest, PACKAGE_MANIFEST};
use super::materializer::{run_materializer, MaterializeRequest, Materializer};
use super::package::{PackageRecord, UnpackState};
use crate::archive::{EntryKind, TarArchive};
use crate::backend::{ContentBackend, LocalBackend, WorkerBackend};
use crate::cache::{DiskBackendFactory, StorageFactory};
use crate::config::LoaderConfig;
use crate::emitter::Emitter;
use crate::server::{Event, GetResource, ResourceData, ResponseType};
use crate::transport::{HttpTransport, Transport};

/// Request id used for the application manifest.
pub const MANIFEST_REQUEST_ID: &str = "manifest";

/// Notifications published by the loader.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// The application manifest was parsed and package records rebuilt.
    ManifestLoaded { version: String, packages: usize },

    /// The application manifest arrived but could not be used.
    ManifestError { error: String },

    /// A package download advanced.
    DownloadProgress { package: String, progress: u8 },

    /// A package archive arrived and was queued for unpacking.
    PackageDownloaded { group: String, package: String },

    /// The server reported an error. `resource_name` is the request id.
    DownloadError {
        resource_name: Option<String>,
        error: String,
    },

    /// A resource was materialized.
    ResourceLoaded {
        group: String,
        package: String,
        resource: String,
    },

    /// Every package of the group has been unpacked.
    GroupReady { group: String, content_set: ContentSet },

    /// A package of the group failed to unpack.
    GroupError {
        group: String,
        package: String,
        error: String,
    },
}

/// Collaborators handed to the content server when connecting.
#[derive(Clone)]
pub struct ServerContext {
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn StorageFactory>,
    /// Runtime for the in-process backend. Defaults to the current runtime.
    pub runtime: Option<Handle>,
}

impl ServerContext {
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn StorageFactory>) -> Self {
        Self {
            transport,
            storage,
            runtime: None,
        }
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// HTTP transport and on-disk caches as described by `config`.
    pub fn from_config(config: &LoaderConfig) -> LoaderResult<Self> {
        let transport = HttpTransport::with_timeout(config.request_timeout())?;
        let storage = DiskBackendFactory::new(&config.cache_dir);
        Ok(Self::new(Arc::new(transport), Arc::new(storage)))
    }
}

/// Downloads, caches and unpacks content packages.
///
/// `C` is the host context passed through to materializers, such as a
/// renderer handle for texture uploads.
pub struct ContentLoader<C = ()> {
    application_name: String,
    platform_name: String,
    version: String,
    offline: bool,
    context: ServerContext,
    backend: Option<Box<dyn ContentBackend>>,
    manifest: Option<ApplicationManifest>,
    packages: Vec<PackageRecord>,
    groups: HashMap<String, Vec<String>>,
    unpack_queue: VecDeque<String>,
    materializers: HashMap<String, Box<dyn Materializer<C>>>,
    clock: Arc<dyn Clock>,
    events: Emitter<LoaderEvent>,
}

impl<C> ContentLoader<C> {
    pub fn new(
        application_name: impl Into<String>,
        platform_name: impl Into<String>,
        version: impl Into<String>,
        context: ServerContext,
    ) -> Self {
        Self {
            application_name: application_name.into(),
            platform_name: platform_name.into(),
            version: version.into(),
            offline: false,
            context,
            backend: None,
            manifest: None,
            packages: Vec::new(),
            groups: HashMap::new(),
            unpack_queue: VecDeque::new(),
            materializers: HashMap::new(),
            clock: Arc::new(SystemClock),
            events: Emitter::new(),
        }
    }

    /// Measure unpack budgets against `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build a loader from `config`, connect it, open the application cache
    /// and register the configured servers.
    pub fn from_config(config: &LoaderConfig, context: ServerContext) -> LoaderResult<Self> {
        let mut loader = Self::new(
            config.application_name.clone(),
            config.platform_name.clone(),
            config.version.clone(),
            context,
        );
        loader.set_offline(config.offline);
        loader.connect(config.background)?;
        let application = loader.application_name.clone();
        loader.open_cache(&application)?;
        for server in &config.servers {
            loader.add_server(server)?;
        }
        Ok(loader)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Whether the next manifest request should be served from cache.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn is_connected(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_running())
    }

    pub fn events(&self) -> &Emitter<LoaderEvent> {
        &self.events
    }

    pub fn manifest(&self) -> Option<&ApplicationManifest> {
        self.manifest.as_ref()
    }

    pub fn packages(&self) -> &[PackageRecord] {
        &self.packages
    }

    /// Package record by friendly name.
    pub fn package(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.iter().find(|p| p.friendly_name() == name)
    }

    /// Package names requested together under `group`.
    pub fn group(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// Packages waiting in the unpack queue.
    pub fn pending_unpacks(&self) -> usize {
        self.unpack_queue.len()
    }

    /// Register the materializer for resources of `resource_type`,
    /// replacing any previous one.
    pub fn register_materializer<M>(&mut self, resource_type: impl Into<String>, materializer: M)
    where
        M: Materializer<C> + 'static,
    {
        self.materializers
            .insert(resource_type.into(), Box::new(materializer));
    }

    // =========================================================================
    // Server lifecycle
    // =========================================================================

    /// Start a content server. With `background` it runs on a worker
    /// thread; otherwise in-process on the context's runtime.
    ///
    /// An existing connection is shut down first.
    pub fn connect(&mut self, background: bool) -> LoaderResult<()> {
        self.disconnect();

        let transport = Arc::clone(&self.context.transport);
        let storage = Arc::clone(&self.context.storage);
        let backend: Box<dyn ContentBackend> = if background {
            Box::new(WorkerBackend::spawn(transport, storage)?)
        } else {
            let runtime = match &self.context.runtime {
                Some(runtime) => runtime.clone(),
                None => Handle::try_current().map_err(|_| LoaderError::NoRuntime)?,
            };
            Box::new(LocalBackend::new(transport, storage, runtime))
        };

        info!(
            application = %self.application_name,
            background,
            "content loader connected"
        );
        self.backend = Some(backend);
        Ok(())
    }

    /// Stop the content server. In-flight requests are abandoned.
    pub fn disconnect(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
            info!(application = %self.application_name, "content loader disconnected");
        }
    }

    fn backend(&mut self) -> LoaderResult<&mut Box<dyn ContentBackend>> {
        self.backend.as_mut().ok_or(LoaderError::NotConnected)
    }

    /// Open or create a cache. The first cache opened names the application
    /// when none was configured.
    pub fn open_cache(&mut self, name: &str) -> LoaderResult<()> {
        if self.application_name.is_empty() {
            self.application_name = name.to_string();
        }
        self.backend()?.open_cache(name)?;
        Ok(())
    }

    /// Delete a cache; `None` deletes the application cache.
    pub fn delete_cache(&mut self, name: Option<&str>) -> LoaderResult<()> {
        let name = name.unwrap_or(&self.application_name).to_string();
        self.backend()?.delete_cache(&name)?;
        Ok(())
    }

    /// Add a content origin for package downloads.
    pub fn add_server(&mut self, url: &str) -> LoaderResult<()> {
        self.backend()?.add_origin(url)?;
        Ok(())
    }

    /// Remove a content origin. Requests already sent to it run to completion.
    pub fn remove_server(&mut self, url: &str) -> LoaderResult<()> {
        self.backend()?.remove_origin(url)?;
        Ok(())
    }

    /// Request `<application>.manifest`.
    ///
    /// Online the manifest always comes from the network; with `offline`
    /// the cached copy is used.
    pub fn load_application_manifest(&mut self, offline: bool) -> LoaderResult<()> {
        let request = GetResource::new(
            MANIFEST_REQUEST_ID,
            self.application_name.clone(),
            format!("{}.manifest", self.application_name),
        )
        .with_response_type(ResponseType::Json)
        .with_return_cached(offline);

        debug!(application = %self.application_name, offline, "requesting application manifest");
        self.backend()?.get_resource(request)?;
        Ok(())
    }

    // =========================================================================
    // Manifest and package requests
    // =========================================================================

    /// Parse a JSON application manifest.
    pub fn process_application_manifest(&mut self, text: &str) -> LoaderResult<()> {
        let manifest = ApplicationManifest::from_json(text)?;
        self.apply_manifest(manifest)
    }

    /// Use an already decoded application manifest.
    pub fn process_manifest_value(&mut self, value: serde_json::Value) -> LoaderResult<()> {
        let manifest = ApplicationManifest::from_value(value)?;
        self.apply_manifest(manifest)
    }

    /// Rebuild package records for the configured version and platform.
    ///
    /// Records whose name and archive file are unchanged are carried over
    /// with their state, so a manifest refresh does not disturb packages
    /// that are downloading or unpacking.
    fn apply_manifest(&mut self, manifest: ApplicationManifest) -> LoaderResult<()> {
        let entries = manifest.packages(&self.version, &self.platform_name)?;

        let mut previous = std::mem::take(&mut self.packages);
        let packages: Vec<PackageRecord> = entries
            .iter()
            .map(|entry| {
                match previous
                    .iter()
                    .position(|p| p.friendly_name() == entry.name && p.filename() == entry.file)
                {
                    Some(index) => previous.swap_remove(index),
                    None => PackageRecord::new(entry),
                }
            })
            .collect();

        self.packages = packages;
        self.manifest = Some(manifest);
        let packages = &self.packages;
        self.unpack_queue
            .retain(|name| packages.iter().any(|p| p.friendly_name() == name));

        info!(
            version = %self.version,
            platform = %self.platform_name,
            packages = self.packages.len(),
            "application manifest loaded"
        );
        self.events.publish(&LoaderEvent::ManifestLoaded {
            version: self.version.clone(),
            packages: self.packages.len(),
        });
        Ok(())
    }

    /// Request a single package as a group of its own.
    pub fn load_package(&mut self, name: &str, content_set: ContentSet) -> LoaderResult<()> {
        self.load_package_group(name, content_set, &[name])
    }

    /// Request every named package and track them together as `group`.
    ///
    /// Names missing from the manifest are skipped. Archives are served
    /// from the cache when present.
    pub fn load_package_group(
        &mut self,
        group: &str,
        content_set: ContentSet,
        names: &[&str],
    ) -> LoaderResult<()> {
        if self.backend.is_none() {
            return Err(LoaderError::NotConnected);
        }

        let mut requested = Vec::new();
        for name in names {
            let Some(index) = self.find_index(name) else {
                debug!(package = %name, group, "package not in manifest, skipping");
                continue;
            };

            self.unpack_queue.retain(|queued| queued != name);
            let record = &mut self.packages[index];
            record.reset(group, content_set.clone());
            let request = GetResource::new(
                record.friendly_name(),
                self.application_name.clone(),
                record.filename(),
            )
            .with_response_type(ResponseType::Bytes)
            .with_return_cached(true);

            self.backend()?.get_resource(request)?;
            requested.push(name.to_string());
        }

        if !requested.is_empty() {
            debug!(group, packages = ?requested, "package group requested");
            self.groups.insert(group.to_string(), requested);
        }
        Ok(())
    }

    /// Whether every package of `group` has been unpacked.
    ///
    /// False for groups that were never requested.
    pub fn has_fully_loaded(&self, group: &str) -> bool {
        self.groups.get(group).is_some_and(|names| {
            names.iter().all(|name| {
                self.package(name)
                    .is_some_and(|p| p.unpack_state() == UnpackState::Complete)
            })
        })
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.packages.iter().position(|p| p.friendly_name() == name)
    }

    // =========================================================================
    // Server events
    // =========================================================================

    /// Apply every event the content server has produced since the last
    /// call. Returns the number of events handled.
    pub fn poll_events(&mut self) -> usize {
        let Some(backend) = self.backend.as_mut() else {
            return 0;
        };
        let events = backend.poll_events();
        let count = events.len();
        for event in events {
            self.handle_server_event(event);
        }
        count
    }

    fn handle_server_event(&mut self, event: Event) {
        match event {
            Event::Error {
                message,
                request_id,
            } => self.handle_server_error(request_id, message),
            Event::CacheReady { name } => {
                if name == self.application_name {
                    let offline = self.offline;
                    if let Err(e) = self.load_application_manifest(offline) {
                        warn!(error = %e, "failed to request application manifest");
                    }
                } else {
                    debug!(cache = %name, "cache ready");
                }
            }
            Event::Progress {
                request_id,
                percent,
            } => {
                if request_id == MANIFEST_REQUEST_ID {
                    return;
                }
                if let Some(index) = self.find_index(&request_id) {
                    self.packages[index].progress = percent;
                    self.events.publish(&LoaderEvent::DownloadProgress {
                        package: request_id,
                        progress: percent,
                    });
                }
            }
            Event::ResourceData {
                request_id, data, ..
            } => {
                if request_id == MANIFEST_REQUEST_ID {
                    self.handle_manifest_data(data);
                } else {
                    self.handle_package_data(&request_id, data);
                }
            }
        }
    }

    fn handle_server_error(&mut self, request_id: Option<String>, message: String) {
        warn!(request_id = ?request_id, error = %message, "content server error");
        if let Some(index) = request_id.as_deref().and_then(|id| self.find_index(id)) {
            let record = &mut self.packages[index];
            if record.is_requested() && !record.is_downloaded() {
                record.unpack_state = UnpackState::Error;
                record.error = Some(message.clone());
            }
        }
        self.events.publish(&LoaderEvent::DownloadError {
            resource_name: request_id,
            error: message,
        });
    }

    fn handle_manifest_data(&mut self, data: ResourceData) {
        let result = match data {
            ResourceData::Json(value) => self.process_manifest_value(value),
            ResourceData::Text(text) => self.process_application_manifest(&text),
            ResourceData::Bytes(bytes) => serde_json::from_slice(&bytes)
                .map_err(LoaderError::from)
                .and_then(|value| self.process_manifest_value(value)),
        };
        if let Err(e) = result {
            warn!(error = %e, "application manifest rejected");
            self.events.publish(&LoaderEvent::ManifestError {
                error: e.to_string(),
            });
        }
    }

    fn handle_package_data(&mut self, name: &str, data: ResourceData) {
        let Some(index) = self.find_index(name) else {
            debug!(package = %name, "data for unknown package ignored");
            return;
        };
        if !self.packages[index].is_requested() {
            debug!(package = %name, "data for unrequested package ignored");
            return;
        }

        let bytes = match data {
            ResourceData::Bytes(bytes) => bytes,
            ResourceData::Text(text) => Bytes::from(text),
            ResourceData::Json(_) => {
                let record = &mut self.packages[index];
                record.unpack_state = UnpackState::Error;
                record.error = Some("package delivered as JSON".to_string());
                self.events.publish(&LoaderEvent::DownloadError {
                    resource_name: Some(name.to_string()),
                    error: "package delivered as JSON".to_string(),
                });
                return;
            }
        };

        let record = &mut self.packages[index];
        debug!(package = %name, bytes = bytes.len(), "package downloaded");
        record.archive_bytes = Some(bytes);
        record.progress = 100;
        record.unpack_state = UnpackState::ParseArchive;
        let group = record.group_name().to_string();

        if !self.unpack_queue.iter().any(|queued| queued == name) {
            self.unpack_queue.push_back(name.to_string());
        }
        self.events.publish(&LoaderEvent::PackageDownloaded {
            group,
            package: name.to_string(),
        });
    }

    // =========================================================================
    // Unpacking
    // =========================================================================

    /// Poll server events, then unpack for at most `budget`.
    pub fn update(&mut self, budget: Duration, context: &mut C) -> usize {
        self.poll_events();
        self.unpack_resources(budget, context)
    }

    /// Advance the package at the head of the unpack queue one step at a
    /// time until the queue is empty or `budget` has elapsed.
    ///
    /// Elapsed time is checked before every step, so the call overruns the
    /// budget by at most one step. Returns the number of steps taken.
    pub fn unpack_resources(&mut self, budget: Duration, context: &mut C) -> usize {
        let start = self.clock.now();
        let mut steps = 0;

        while self.clock.now().saturating_duration_since(start) < budget {
            let Some(name) = self.unpack_queue.front().cloned() else {
                break;
            };
            let Some(index) = self.find_index(&name) else {
                self.unpack_queue.pop_front();
                continue;
            };

            match self.packages[index].unpack_state {
                UnpackState::ParseArchive => self.parse_archive(index),
                UnpackState::LoadResources => self.load_next_resource(index, context),
                UnpackState::Complete | UnpackState::Error => {
                    self.unpack_queue.pop_front();
                    continue;
                }
            }
            steps += 1;
        }
        steps
    }

    fn parse_archive(&mut self, index: usize) {
        match read_package(&self.packages[index]) {
            Ok((archive, manifest)) => {
                let record = &mut self.packages[index];
                debug!(
                    package = %record.friendly_name(),
                    entries = archive.len(),
                    resources = manifest.resources.len(),
                    "package archive parsed"
                );
                record.archive = Some(Arc::new(archive));
                record.manifest = Some(Arc::new(manifest));
                record.unpack_index = 0;
                record.unpack_state = UnpackState::LoadResources;
            }
            Err(e) => self.fail_package(index, e),
        }
    }

    fn load_next_resource(&mut self, index: usize, context: &mut C) {
        let record = &self.packages[index];
        let (Some(archive), Some(manifest), Some(content_set)) = (
            record.archive.clone(),
            record.manifest.clone(),
            record.content_set.clone(),
        ) else {
            let name = record.friendly_name().to_string();
            self.fail_package(index, LoaderError::MissingPackageManifest(name));
            return;
        };
        let group = record.group_name().to_string();
        let package = record.friendly_name().to_string();
        let position = record.unpack_index;

        if let Some(metadata) = manifest.resources.get(position) {
            match self.materializers.get_mut(&metadata.resource_type) {
                Some(materializer) => {
                    let request = MaterializeRequest {
                        archive: &archive,
                        metadata,
                        content_set: &content_set,
                        context,
                        group_name: &group,
                        package_name: &package,
                    };
                    if let Err(source) = run_materializer(materializer.as_mut(), request) {
                        let error = LoaderError::Materialize {
                            package,
                            resource: metadata.name.clone(),
                            source,
                        };
                        self.fail_package(index, error);
                        return;
                    }
                    self.events.publish(&LoaderEvent::ResourceLoaded {
                        group: group.clone(),
                        package: package.clone(),
                        resource: metadata.name.clone(),
                    });
                }
                None => warn!(
                    package = %package,
                    resource = %metadata.name,
                    resource_type = %metadata.resource_type,
                    "no materializer registered, resource skipped"
                ),
            }
            self.packages[index].unpack_index += 1;
        }

        if self.packages[index].unpack_index >= manifest.resources.len() {
            self.complete_package(index);
        }
    }

    fn complete_package(&mut self, index: usize) {
        let record = &mut self.packages[index];
        record.unpack_state = UnpackState::Complete;
        let package = record.friendly_name().to_string();
        let group = record.group_name().to_string();
        let content_set = record.content_set.clone();
        self.unpack_queue.retain(|queued| *queued != package);

        info!(package = %package, group = %group, "package unpacked");
        if self.has_fully_loaded(&group) {
            if let Some(content_set) = content_set {
                info!(group = %group, "package group ready");
                self.events
                    .publish(&LoaderEvent::GroupReady { group, content_set });
            }
        }
    }

    fn fail_package(&mut self, index: usize, error: LoaderError) {
        let record = &mut self.packages[index];
        record.unpack_state = UnpackState::Error;
        record.error = Some(error.to_string());
        let package = record.friendly_name().to_string();
        let group = record.group_name().to_string();
        self.unpack_queue.retain(|queued| *queued != package);

        warn!(package = %package, group = %group, error = %error, "package failed to unpack");
        self.events.publish(&LoaderEvent::GroupError {
            group,
            package,
            error: error.to_string(),
        });
    }
}

impl<C> Drop for ContentLoader<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Parse a downloaded archive and its `package.manifest`.
fn read_package(record: &PackageRecord) -> LoaderResult<(TarArchive, PackageManifest)> {
    let package = record.friendly_name().to_string();
    let bytes = record.archive_bytes.clone().unwrap_or_default();
    let archive = TarArchive::parse(&[EntryKind::File], bytes).map_err(|source| {
        LoaderError::Archive {
            package: package.clone(),
            source,
        }
    })?;
    if archive.skipped() > 0 {
        warn!(package = %package, skipped = archive.skipped(), "archive had unreadable headers");
    }
    let manifest = load_object::<PackageManifest>(PACKAGE_MANIFEST, &archive)
        .map_err(|source| LoaderError::Archive {
            package: package.clone(),
            source,
        })?
        .ok_or(LoaderError::MissingPackageManifest(package))?;
    Ok((archive, manifest))
}

/// Build and connect a loader from `config`.
///
/// Equivalent to [`ContentLoader::from_config`]; the loader is connected,
/// the application cache is being opened and the configured servers are
/// registered. The application manifest is requested once the cache is
/// ready.
pub fn create_loader<C>(
    config: &LoaderConfig,
    context: ServerContext,
) -> LoaderResult<ContentLoader<C>> {
    ContentLoader::from_config(config, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::cache::MemoryBackendFactory;
    use crate::loader::clock::ManualClock;
    use crate::loader::error::MaterializerError;
    use crate::transport::MockTransport;
    use parking_lot::Mutex;

    const MANIFEST: &str = r#"{
        "latest": { "packages": { "x": [
            { "name": "core", "file": "core.package" },
            { "name": "level01", "file": "level01.package" }
        ] } }
    }"#;

    fn package(resources: &[(&str, &str)]) -> Bytes {
        let listing: Vec<serde_json::Value> = resources
            .iter()
            .map(|(name, kind)| {
                serde_json::json!({ "name": name, "type": kind, "data": [format!("{name}.txt")] })
            })
            .collect();
        let mut builder = ArchiveBuilder::new();
        builder
            .append_file(
                PACKAGE_MANIFEST,
                serde_json::json!({ "resources": listing }).to_string().as_bytes(),
            )
            .unwrap();
        for (name, _) in resources {
            builder
                .append_file(&format!("{name}.txt"), name.as_bytes())
                .unwrap();
        }
        builder.finish()
    }

    fn loader() -> (ContentLoader<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let context = ServerContext::new(
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBackendFactory::new()),
        );
        let mut loader = ContentLoader::new("game", "x", "latest", context)
            .with_clock(clock.clone());
        loader.process_application_manifest(MANIFEST).unwrap();
        (loader, clock)
    }

    fn record_events(loader: &ContentLoader<u32>) -> Arc<Mutex<Vec<LoaderEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        loader.events().subscribe(move |e| sink.lock().push(e.clone()));
        seen
    }

    fn text_materializer(
        clock: Arc<ManualClock>,
        step: Duration,
    ) -> impl Materializer<u32> + 'static {
        move |request: MaterializeRequest<'_, u32>| -> Result<(), MaterializerError> {
            clock.advance(step);
            *request.context += 1;
            let file = &request.metadata.data[0];
            let text = request.archive.data_by_name(file)?.to_str()?.to_string();
            request.content_set.insert(request.metadata.name.clone(), text);
            Ok(())
        }
    }

    /// Mark packages as requested without going through a backend.
    fn request(loader: &mut ContentLoader<u32>, group: &str, set: &ContentSet, names: &[&str]) {
        for name in names {
            let index = loader.find_index(name).unwrap();
            loader.packages[index].reset(group, set.clone());
        }
        loader.groups.insert(
            group.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    /// Stand in for a finished download.
    fn deliver(loader: &mut ContentLoader<u32>, name: &str, bytes: Bytes) {
        loader.handle_package_data(name, ResourceData::Bytes(bytes));
    }

    #[test]
    fn test_manifest_creates_records() {
        let (loader, _) = loader();
        let names: Vec<&str> = loader.packages().iter().map(|p| p.friendly_name()).collect();
        assert_eq!(names, vec!["core", "level01"]);
        assert_eq!(loader.package("level01").unwrap().filename(), "level01.package");
        assert!(loader.manifest().is_some());
    }

    #[test]
    fn test_manifest_with_unrelated_malformed_keys() {
        let (mut loader, _) = loader();
        let text = r#"{
            "generated": "2014-01-01",
            "0.9": { "packages": { "x": [ { "name": "old" } ] } },
            "latest": { "packages": { "x": [
                { "name": "core", "file": "core.package" }
            ] } }
        }"#;
        loader.process_application_manifest(text).unwrap();
        let names: Vec<&str> = loader.packages().iter().map(|p| p.friendly_name()).collect();
        assert_eq!(names, vec!["core"]);
    }

    #[test]
    fn test_manifest_for_unknown_platform_is_rejected() {
        let context = ServerContext::new(
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBackendFactory::new()),
        );
        let mut loader: ContentLoader = ContentLoader::new("game", "ps3", "latest", context);
        assert!(matches!(
            loader.process_application_manifest(MANIFEST),
            Err(LoaderError::UnknownPlatform { .. })
        ));
        assert!(loader.packages().is_empty());
    }

    #[test]
    fn test_load_package_requires_connection() {
        let (mut loader, _) = loader();
        assert!(matches!(
            loader.load_package("core", ContentSet::new()),
            Err(LoaderError::NotConnected)
        ));
    }

    #[test]
    fn test_group_ready_after_every_package_completes() {
        let (mut loader, clock) = loader();
        loader.register_materializer("text", text_materializer(clock.clone(), Duration::ZERO));
        let seen = record_events(&loader);
        let set = ContentSet::new();
        let mut ctx = 0u32;

        request(&mut loader, "level01", &set, &["core", "level01"]);
        deliver(&mut loader, "core", package(&[("a", "text")]));
        assert!(!loader.has_fully_loaded("level01"));
        loader.unpack_resources(Duration::from_millis(5), &mut ctx);
        assert!(!loader.has_fully_loaded("level01"));

        deliver(&mut loader, "level01", package(&[("b", "text"), ("c", "text")]));
        loader.unpack_resources(Duration::from_millis(5), &mut ctx);
        assert!(loader.has_fully_loaded("level01"));
        assert_eq!(ctx, 3);
        assert_eq!(set.names(), vec!["a", "b", "c"]);

        let ready: Vec<_> = seen
            .lock()
            .iter()
            .filter_map(|e| match e {
                LoaderEvent::GroupReady { group, content_set } => {
                    Some((group.clone(), content_set.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, "level01");
        assert!(ready[0].1.ptr_eq(&set));
    }

    #[test]
    fn test_unpack_respects_budget() {
        let (mut loader, clock) = loader();
        loader.register_materializer("text", text_materializer(clock.clone(), Duration::from_millis(10)));
        let set = ContentSet::new();
        let mut ctx = 0u32;

        let resources = [("a", "text"), ("b", "text"), ("c", "text"), ("d", "text"), ("e", "text")];
        request(&mut loader, "core", &set, &["core"]);
        deliver(&mut loader, "core", package(&resources));

        // parse (0ms), a (10ms), b (20ms), c (30ms) then out of budget
        let steps = loader.unpack_resources(Duration::from_millis(25), &mut ctx);
        assert_eq!(steps, 4);
        assert_eq!(ctx, 3);
        assert_eq!(loader.package("core").unwrap().unpack_index(), 3);
        assert_eq!(loader.pending_unpacks(), 1);

        loader.unpack_resources(Duration::from_secs(1), &mut ctx);
        assert_eq!(ctx, 5);
        assert!(loader.has_fully_loaded("core"));
        assert_eq!(loader.pending_unpacks(), 0);
    }

    #[test]
    fn test_zero_budget_does_no_work() {
        let (mut loader, clock) = loader();
        loader.register_materializer("text", text_materializer(clock, Duration::ZERO));
        let set = ContentSet::new();
        request(&mut loader, "core", &set, &["core"]);
        deliver(&mut loader, "core", package(&[("a", "text")]));

        let mut ctx = 0;
        assert_eq!(loader.unpack_resources(Duration::ZERO, &mut ctx), 0);
        assert_eq!(loader.pending_unpacks(), 1);
    }

    #[test]
    fn test_materializer_failure_marks_package_and_continues() {
        let (mut loader, clock) = loader();
        loader.register_materializer("text", text_materializer(clock, Duration::ZERO));
        loader.register_materializer(
            "broken",
            |_request: MaterializeRequest<'_, u32>| -> Result<(), MaterializerError> {
                Err(MaterializerError::other("corrupt"))
            },
        );
        let seen = record_events(&loader);
        let set = ContentSet::new();
        let mut ctx = 0;

        request(&mut loader, "g", &set, &["core"]);
        request(&mut loader, "h", &set, &["level01"]);
        deliver(&mut loader, "core", package(&[("a", "broken"), ("b", "text")]));
        deliver(&mut loader, "level01", package(&[("c", "text")]));
        loader.unpack_resources(Duration::from_secs(1), &mut ctx);

        let core = loader.package("core").unwrap();
        assert_eq!(core.unpack_state(), UnpackState::Error);
        assert!(core.error().unwrap().contains("corrupt"));
        assert!(!loader.has_fully_loaded("g"));
        assert!(loader.has_fully_loaded("h"));
        assert!(seen.lock().iter().any(|e| matches!(
            e,
            LoaderEvent::GroupError { group, package, .. } if group == "g" && package == "core"
        )));
    }

    #[test]
    fn test_panicking_materializer_is_contained() {
        let (mut loader, _) = loader();
        loader.register_materializer(
            "text",
            |_request: MaterializeRequest<'_, u32>| -> Result<(), MaterializerError> {
                panic!("gpu lost")
            },
        );
        let set = ContentSet::new();
        request(&mut loader, "g", &set, &["core"]);
        deliver(&mut loader, "core", package(&[("a", "text")]));

        let mut ctx = 0;
        loader.unpack_resources(Duration::from_secs(1), &mut ctx);
        let core = loader.package("core").unwrap();
        assert_eq!(core.unpack_state(), UnpackState::Error);
        assert!(core.error().unwrap().contains("gpu lost"));
    }

    #[test]
    fn test_unknown_resource_type_is_skipped() {
        let (mut loader, _) = loader();
        let set = ContentSet::new();
        request(&mut loader, "g", &set, &["core"]);
        deliver(&mut loader, "core", package(&[("a", "video")]));

        let mut ctx = 0;
        loader.unpack_resources(Duration::from_secs(1), &mut ctx);
        assert!(loader.has_fully_loaded("g"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_archive_without_manifest_fails() {
        let (mut loader, _) = loader();
        let seen = record_events(&loader);
        let mut builder = ArchiveBuilder::new();
        builder.append_file("a.txt", b"a").unwrap();
        let set = ContentSet::new();
        request(&mut loader, "g", &set, &["core"]);
        deliver(&mut loader, "core", builder.finish());

        let mut ctx = 0;
        loader.unpack_resources(Duration::from_secs(1), &mut ctx);
        assert_eq!(
            loader.package("core").unwrap().unpack_state(),
            UnpackState::Error
        );
        assert!(seen
            .lock()
            .iter()
            .any(|e| matches!(e, LoaderEvent::GroupError { .. })));
    }

    #[test]
    fn test_empty_package_completes() {
        let (mut loader, _) = loader();
        let set = ContentSet::new();
        request(&mut loader, "g", &set, &["core"]);
        deliver(&mut loader, "core", package(&[]));

        let mut ctx = 0;
        loader.unpack_resources(Duration::from_secs(1), &mut ctx);
        assert!(loader.has_fully_loaded("g"));
    }

    #[test]
    fn test_manifest_refresh_keeps_matching_records() {
        let (mut loader, _) = loader();
        let set = ContentSet::new();
        request(&mut loader, "g", &set, &["core"]);
        deliver(&mut loader, "core", package(&[]));

        let refreshed = r#"{ "latest": { "packages": { "x": [
            { "name": "core", "file": "core.package" },
            { "name": "level01", "file": "level01-v2.package" }
        ] } } }"#;
        loader.process_application_manifest(refreshed).unwrap();

        assert!(loader.package("core").unwrap().is_downloaded());
        assert_eq!(loader.pending_unpacks(), 1);
        assert_eq!(
            loader.package("level01").unwrap().filename(),
            "level01-v2.package"
        );
    }

    #[test]
    fn test_progress_and_errors_update_records() {
        let (mut loader, _) = loader();
        let seen = record_events(&loader);
        let index = loader.find_index("core").unwrap();
        loader.packages[index].reset("g", ContentSet::new());

        loader.handle_server_event(Event::Progress {
            request_id: "core".to_string(),
            percent: 40,
        });
        assert_eq!(loader.package("core").unwrap().progress(), 40);

        loader.handle_server_event(Event::Error {
            message: "HTTP 404".to_string(),
            request_id: Some("core".to_string()),
        });
        assert_eq!(
            loader.package("core").unwrap().unpack_state(),
            UnpackState::Error
        );

        let events = seen.lock();
        assert!(matches!(
            &events[0],
            LoaderEvent::DownloadProgress { package, progress: 40 } if package == "core"
        ));
        assert!(matches!(
            &events[1],
            LoaderEvent::DownloadError { resource_name: Some(name), .. } if name == "core"
        ));
    }

    #[test]
    fn test_bad_manifest_data_publishes_error() {
        let (mut loader, _) = loader();
        let seen = record_events(&loader);
        loader.handle_manifest_data(ResourceData::Json(serde_json::json!({ "1.0": {} })));
        assert!(seen
            .lock()
            .iter()
            .any(|e| matches!(e, LoaderEvent::ManifestError { .. })));
        assert_eq!(loader.packages().len(), 2);
    }
}
