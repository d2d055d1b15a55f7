//! Application hooks that turn archive entries into runtime objects.
//!
//! The loader dispatches each resource listed in a package manifest to the
//! materializer registered for its `type`. A materializer reads whatever
//! entries it needs from the archive and stores its result in the group's
//! [`ContentSet`].
//!
//! # Example
//!
//! ```
//! use content_loader::loader::{
//!     file_with_extension, MaterializeRequest, Materializer, MaterializerError,
//! };
//!
//! fn load_text(request: MaterializeRequest<'_, ()>) -> Result<(), MaterializerError> {
//!     let file = file_with_extension("txt", request.metadata, 0)
//!         .ok_or_else(|| MaterializerError::MissingFile("*.txt".to_string()))?;
//!     let view = request.archive.data_by_name(file)?;
//!     request
//!         .content_set
//!         .insert(request.metadata.name.clone(), view.to_str()?.to_string());
//!     Ok(())
//! }
//!
//! fn assert_materializer<M: Materializer<()>>(_: M) {}
//! assert_materializer(load_text);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::content_set::ContentSet;
use super::error::MaterializerError;
use super::manifest::ResourceMetadata;
use crate::archive::TarArchive;

/// Everything a materializer sees for one resource.
pub struct MaterializeRequest<'a, C> {
    pub archive: &'a TarArchive,
    pub metadata: &'a ResourceMetadata,
    pub content_set: &'a ContentSet,
    /// Host-supplied context passed to `unpack_resources`.
    pub context: &'a mut C,
    pub group_name: &'a str,
    pub package_name: &'a str,
}

/// Converts one resource into a runtime object.
pub trait Materializer<C>: Send {
    fn materialize(&mut self, request: MaterializeRequest<'_, C>) -> Result<(), MaterializerError>;
}

impl<C, F> Materializer<C> for F
where
    F: FnMut(MaterializeRequest<'_, C>) -> Result<(), MaterializerError> + Send,
{
    fn materialize(&mut self, request: MaterializeRequest<'_, C>) -> Result<(), MaterializerError> {
        self(request)
    }
}

/// Run a materializer, converting a panic into [`MaterializerError::Panicked`].
pub(crate) fn run_materializer<C, M>(
    materializer: &mut M,
    request: MaterializeRequest<'_, C>,
) -> Result<(), MaterializerError>
where
    M: Materializer<C> + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(|| materializer.materialize(request))) {
        Ok(result) => result,
        Err(payload) => Err(MaterializerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
