//! Execution backend interface.

use thiserror::Error;

use crate::server::{Command, Event, GetResource};

/// Errors raised by an execution backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has been shut down.
    #[error("content backend is not running")]
    Stopped,

    /// A message could not be serialized for the worker boundary.
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The worker thread or its runtime could not be started.
    #[error("failed to start content worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Carries commands to a content server and events back.
///
/// Implementations differ only in where the server runs. Callers see the
/// same commands and events either way.
pub trait ContentBackend: Send {
    /// Deliver a command to the server.
    fn send(&mut self, command: Command) -> Result<(), BackendError>;

    /// Drain every event the server has produced since the last call.
    fn poll_events(&mut self) -> Vec<Event>;

    /// Stop the server. In-flight requests are abandoned without events.
    fn shutdown(&mut self);

    fn is_running(&self) -> bool;

    fn add_origin(&mut self, url: &str) -> Result<(), BackendError> {
        self.send(Command::AddOrigin {
            url: url.to_string(),
        })
    }

    fn remove_origin(&mut self, url: &str) -> Result<(), BackendError> {
        self.send(Command::RemoveOrigin {
            url: url.to_string(),
        })
    }

    fn open_cache(&mut self, name: &str) -> Result<(), BackendError> {
        self.send(Command::OpenCache {
            name: name.to_string(),
        })
    }

    fn delete_cache(&mut self, name: &str) -> Result<(), BackendError> {
        self.send(Command::DeleteCache {
            name: name.to_string(),
        })
    }

    fn get_resource(&mut self, args: GetResource) -> Result<(), BackendError> {
        self.send(Command::GetResource(args))
    }
}
