//! Per-package download and unpack state.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::content_set::ContentSet;
use super::manifest::{PackageEntry, PackageManifest};
use crate::archive::TarArchive;

/// Unpack progress of a downloaded package.
///
/// ```text
/// ParseArchive ──► LoadResources ──► Complete
///       │                │
///       └────────────────┴─────────► Error
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UnpackState {
    #[default]
    ParseArchive,
    LoadResources,
    Complete,
    Error,
}

impl UnpackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnpackState::Complete | UnpackState::Error)
    }
}

impl fmt::Display for UnpackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnpackState::ParseArchive => "parse-archive",
            UnpackState::LoadResources => "load-resources",
            UnpackState::Complete => "complete",
            UnpackState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything the loader tracks for one package of the active manifest.
///
/// Records live as long as the manifest that declared them and are reset
/// each time the package is requested again.
#[derive(Debug, Clone)]
pub struct PackageRecord {
    friendly_name: String,
    filename: String,
    pub(crate) progress: u8,
    pub(crate) manifest: Option<Arc<PackageManifest>>,
    pub(crate) archive: Option<Arc<TarArchive>>,
    pub(crate) archive_bytes: Option<Bytes>,
    pub(crate) group_name: String,
    pub(crate) content_set: Option<ContentSet>,
    pub(crate) unpack_index: usize,
    pub(crate) unpack_state: UnpackState,
    pub(crate) error: Option<String>,
}

impl PackageRecord {
    pub fn new(entry: &PackageEntry) -> Self {
        Self {
            friendly_name: entry.name.clone(),
            filename: entry.file.clone(),
            progress: 0,
            manifest: None,
            archive: None,
            archive_bytes: None,
            group_name: String::new(),
            content_set: None,
            unpack_index: 0,
            unpack_state: UnpackState::ParseArchive,
            error: None,
        }
    }

    /// Clear download and unpack state ahead of a new request.
    pub(crate) fn reset(&mut self, group_name: &str, content_set: ContentSet) {
        self.progress = 0;
        self.manifest = None;
        self.archive = None;
        self.archive_bytes = None;
        self.group_name = group_name.to_string();
        self.content_set = Some(content_set);
        self.unpack_index = 0;
        self.unpack_state = UnpackState::ParseArchive;
        self.error = None;
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Resource name of the archive on the origin.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Download progress in percent.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn content_set(&self) -> Option<&ContentSet> {
        self.content_set.as_ref()
    }

    pub fn manifest(&self) -> Option<&PackageManifest> {
        self.manifest.as_deref()
    }

    pub fn archive(&self) -> Option<&TarArchive> {
        self.archive.as_deref()
    }

    /// Whether the archive bytes have arrived.
    pub fn is_downloaded(&self) -> bool {
        self.archive_bytes.is_some()
    }

    /// Whether the package has been requested since the manifest loaded.
    pub fn is_requested(&self) -> bool {
        self.content_set.is_some()
    }

    /// Index of the next resource to materialize.
    pub fn unpack_index(&self) -> usize {
        self.unpack_index
    }

    pub fn unpack_state(&self) -> UnpackState {
        self.unpack_state
    }

    /// Why the package failed, if it did.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
