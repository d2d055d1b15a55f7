//! Execution backends for the content server.
//!
//! - [`LocalBackend`]: the server lives in the caller's context and commands
//!   are direct calls
//! - [`WorkerBackend`]: the server lives on its own thread and every command
//!   and event crosses as serialized JSON
//!
//! Both implement [`ContentBackend`], so the loader does not know which one
//! it is talking to.

mod local;
mod traits;
mod worker;

pub use local::LocalBackend;
pub use traits::{BackendError, ContentBackend};
pub use worker::WorkerBackend;
