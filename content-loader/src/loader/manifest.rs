//! Application and package manifests.
//!
//! The application manifest is a JSON document fetched from the content
//! origin as `<application>.manifest`:
//!
//! ```text
//! {
//!   "latest": {
//!     "packages": {
//!       "ps3": [ { "name": "core", "file": "3f2a...package" }, ... ]
//!     }
//!   },
//!   "1.0.2": { ... }
//! }
//! ```
//!
//! Each package archive carries a `package.manifest` entry listing the
//! resources it contains:
//!
//! ```text
//! { "resources": [ { "name": "hero", "type": "atlas",
//!                    "tags": ["sprites"], "data": ["hero.atlas", "hero.image"] } ] }
//! ```

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{LoaderError, LoaderResult};
use crate::archive::{ArchiveError, ArchiveResult, TarArchive};

/// Name of the resource listing inside every package archive.
pub const PACKAGE_MANIFEST: &str = "package.manifest";

/// One downloadable package for a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Friendly name used by `load_package` and groups.
    pub name: String,
    /// Resource name of the archive on the origin.
    pub file: String,
}

/// Packages published for one content version, decoded per platform on
/// demand.
#[derive(Debug, Default, Deserialize)]
struct VersionEntry {
    #[serde(default)]
    packages: HashMap<String, serde_json::Value>,
}

/// The application manifest, keyed by version.
///
/// Only the top level is decoded up front. A version's package list is
/// decoded when it is selected, so unrelated keys in the document never
/// reject the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationManifest {
    versions: HashMap<String, serde_json::Value>,
}

impl ApplicationManifest {
    pub fn from_value(value: serde_json::Value) -> LoaderResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json(text: &str) -> LoaderResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Raw document for `version`.
    pub fn version(&self, version: &str) -> Option<&serde_json::Value> {
        self.versions.get(version)
    }

    /// Top-level keys of the manifest, sorted.
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.versions.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }

    /// Packages listed for `platform` under `version`.
    pub fn packages(&self, version: &str, platform: &str) -> LoaderResult<Vec<PackageEntry>> {
        let value = self
            .version(version)
            .ok_or_else(|| LoaderError::UnknownVersion(version.to_string()))?;
        let mut entry = VersionEntry::deserialize(value)?;
        let listing = entry
            .packages
            .remove(platform)
            .ok_or_else(|| LoaderError::UnknownPlatform {
                version: version.to_string(),
                platform: platform.to_string(),
            })?;
        Ok(serde_json::from_value(listing)?)
    }
}

/// Metadata for one resource inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,
    /// Selects the materializer.
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Archive entries that make up the resource.
    #[serde(default)]
    pub data: Vec<String>,
}

/// Contents of a package's `package.manifest` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub resources: Vec<ResourceMetadata>,
}

/// First file in `metadata.data`, starting at `start`, whose extension is
/// `extension`.
///
/// The extension is everything after the last `.`; a name without a `.` is
/// compared whole.
pub fn file_with_extension<'a>(
    extension: &str,
    metadata: &'a ResourceMetadata,
    start: usize,
) -> Option<&'a str> {
    metadata
        .data
        .iter()
        .skip(start)
        .map(String::as_str)
        .find(|name| name.rsplit('.').next() == Some(extension))
}

/// Decode a JSON archive entry.
///
/// Returns `Ok(None)` if the archive has no entry named `filename`. Entries
/// beginning with a UTF-16LE byte order mark are decoded as UTF-16, anything
/// else as UTF-8.
pub fn load_object<T: DeserializeOwned>(
    filename: &str,
    archive: &TarArchive,
) -> ArchiveResult<Option<T>> {
    let Some(entry) = archive.entry_by_name(filename) else {
        return Ok(None);
    };
    let view = archive.data(entry);
    if view.as_bytes().starts_with(&[0xFF, 0xFE]) {
        let text = view.to_utf16_lossy();
        let text = text.trim_start_matches('\u{FEFF}');
        return serde_json::from_str(text)
            .map(Some)
            .map_err(|source| ArchiveError::InvalidJson {
                name: filename.to_string(),
                source,
            });
    }
    view.to_json().map(Some)
}
