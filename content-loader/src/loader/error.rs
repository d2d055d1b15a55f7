//! Error types for the package loader.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::backend::BackendError;
use crate::transport::TransportError;

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors surfaced by [`ContentLoader`](super::ContentLoader) methods.
///
/// Failures that happen while downloading or unpacking are reported as
/// [`LoaderEvent`](super::LoaderEvent)s instead; these variants cover the
/// calls the host makes directly.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A command was issued before `connect` or after `disconnect`.
    #[error("content loader is not connected")]
    NotConnected,

    /// An in-process server was requested outside a tokio runtime.
    #[error("no tokio runtime available for the in-process content server")]
    NoRuntime,

    /// The execution backend rejected a command or failed to start.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The HTTP transport could not be constructed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The application manifest is not valid JSON or has the wrong shape.
    #[error("invalid application manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    /// The application manifest has no entry for the configured version.
    #[error("application manifest has no version {0}")]
    UnknownVersion(String),

    /// The selected version lists no packages for the configured platform.
    #[error("version {version} has no packages for platform {platform:?}")]
    UnknownPlatform { version: String, platform: String },

    /// A package archive carries no `package.manifest` entry.
    #[error("package {0} has no package.manifest")]
    MissingPackageManifest(String),

    /// A package archive or its manifest could not be read.
    #[error("package {package}: {source}")]
    Archive {
        package: String,
        #[source]
        source: ArchiveError,
    },

    /// A materializer rejected a resource.
    #[error("resource {resource} in package {package}: {source}")]
    Materialize {
        package: String,
        resource: String,
        #[source]
        source: MaterializerError,
    },
}

/// Failure reported by an application materializer.
#[derive(Debug, Error)]
pub enum MaterializerError {
    /// A file named by the resource metadata is absent from the archive.
    #[error("missing file {0}")]
    MissingFile(String),

    /// Entry data could not be read.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The materializer panicked.
    #[error("materializer panicked: {0}")]
    Panicked(String),

    /// Application-defined failure.
    #[error("{0}")]
    Other(String),
}

impl MaterializerError {
    pub fn other(message: impl Into<String>) -> Self {
        MaterializerError::Other(message.into())
    }
}
