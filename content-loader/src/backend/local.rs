//! In-process backend.
//!
//! Commands are direct calls on a [`ContentServer`] owned by the backend.
//! Background work runs on the caller's tokio runtime, and its results are
//! applied only when the caller polls, so every state change happens on the
//! caller's side in a single sequence.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::debug;

use super::traits::{BackendError, ContentBackend};
use crate::cache::StorageFactory;
use crate::server::{Command, CompletionQueue, ContentServer, Event};
use crate::transport::Transport;

/// Runs the content server in the caller's execution context.
pub struct LocalBackend {
    server: ContentServer,
    completions: CompletionQueue,
    events: Arc<Mutex<Vec<Event>>>,
    running: bool,
}

impl LocalBackend {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StorageFactory>,
        runtime: Handle,
    ) -> Self {
        let (server, completions) = ContentServer::new(transport, storage, runtime);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        server.events().subscribe(move |event| sink.lock().push(event.clone()));
        debug!("local content backend started");

        Self {
            server,
            completions,
            events,
            running: true,
        }
    }

    /// The wrapped server, for inspection.
    pub fn server(&self) -> &ContentServer {
        &self.server
    }
}

impl ContentBackend for LocalBackend {
    fn send(&mut self, command: Command) -> Result<(), BackendError> {
        if !self.running {
            return Err(BackendError::Stopped);
        }
        self.server.handle_command(command);
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<Event> {
        if !self.running {
            return Vec::new();
        }
        self.server.process_pending(&mut self.completions);
        std::mem::take(&mut *self.events.lock())
    }

    fn shutdown(&mut self) {
        if self.running {
            self.running = false;
            self.server.events().unsubscribe_all();
            self.events.lock().clear();
            debug!("local content backend stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackendFactory;
    use crate::server::GetResource;
    use crate::transport::MockTransport;
    use std::time::Duration;

    async fn poll_until<F>(backend: &mut LocalBackend, mut done: F) -> Vec<Event>
    where
        F: FnMut(&[Event]) -> bool,
    {
        let mut seen = Vec::new();
        for _ in 0..200 {
            seen.extend(backend.poll_events());
            if done(&seen) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        seen
    }

    #[tokio::test]
    async fn test_round_trip_through_local_backend() {
        let transport = Arc::new(MockTransport::new());
        transport.insert("a", b"payload".to_vec());
        let mut backend = LocalBackend::new(
            transport,
            Arc::new(MemoryBackendFactory::new()),
            Handle::current(),
        );

        backend.open_cache("game").unwrap();
        let events = poll_until(&mut backend, |e| !e.is_empty()).await;
        assert_eq!(events, vec![Event::CacheReady { name: "game".into() }]);

        backend.get_resource(GetResource::new("r1", "game", "a")).unwrap();
        let events = poll_until(&mut backend, |e| {
            e.iter().any(|e| matches!(e, Event::ResourceData { .. }))
        })
        .await;
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ResourceData { request_id, .. } if request_id == "r1")));
    }

    #[tokio::test]
    async fn test_shutdown_stops_commands_and_events() {
        let mut backend = LocalBackend::new(
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBackendFactory::new()),
            Handle::current(),
        );
        backend.open_cache("game").unwrap();
        backend.shutdown();

        assert!(!backend.is_running());
        assert!(matches!(
            backend.open_cache("game"),
            Err(BackendError::Stopped)
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(backend.poll_events().is_empty());
    }
}
