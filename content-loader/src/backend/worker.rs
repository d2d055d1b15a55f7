//! Isolated worker backend.
//!
//! The content server runs on a dedicated thread with its own single-threaded
//! tokio runtime. Nothing is shared between the caller and the worker except
//! two channels of JSON strings: commands in, events out.
//!
//! ```text
//!   caller                         worker thread
//!  ────────                       ─────────────────────────────
//!  send(Command) ──json──► select! { command => handle_command
//!                                    completion => apply
//!                                    cancelled => stop }
//!  poll_events() ◄──json── events().subscribe(serialize)
//! ```
//!
//! Shutdown cancels the loop and drops the runtime without waiting for
//! in-flight work, so no further events are produced.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{BackendError, ContentBackend};
use crate::cache::StorageFactory;
use crate::server::{Command, ContentServer, Event};
use crate::transport::Transport;

/// Runs the content server on a background thread.
pub struct WorkerBackend {
    commands: Option<mpsc::UnboundedSender<String>>,
    events: Option<mpsc::UnboundedReceiver<String>>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerBackend {
    /// Start the worker thread.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StorageFactory>,
    ) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        let thread = std::thread::Builder::new()
            .name("content-worker".to_string())
            .spawn(move || {
                runtime.block_on(run_worker(
                    transport,
                    storage,
                    command_rx,
                    event_tx,
                    worker_cancel,
                ));
                runtime.shutdown_background();
                debug!("content worker thread exiting");
            })?;

        info!("content worker started");
        Ok(Self {
            commands: Some(command_tx),
            events: Some(event_rx),
            cancel,
            thread: Some(thread),
        })
    }
}

async fn run_worker(
    transport: Arc<dyn Transport>,
    storage: Arc<dyn StorageFactory>,
    mut commands: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) {
    let (mut server, mut completions) =
        ContentServer::new(transport, storage, tokio::runtime::Handle::current());

    let outbound = events.clone();
    server.events().subscribe(move |event| match serde_json::to_string(event) {
        Ok(json) => {
            let _ = outbound.send(json);
        }
        Err(e) => warn!(error = %e, "failed to serialize event"),
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = commands.recv() => {
                let Some(message) = message else { break };
                match serde_json::from_str::<Command>(&message) {
                    Ok(command) => server.handle_command(command),
                    Err(e) => {
                        warn!(error = %e, "malformed command");
                        let error = Event::Error {
                            message: format!("malformed command: {}", e),
                            request_id: None,
                        };
                        if let Ok(json) = serde_json::to_string(&error) {
                            let _ = events.send(json);
                        }
                    }
                }
            }
            Some(completion) = completions.next() => server.apply(completion),
        }
    }

    server.events().unsubscribe_all();
}

impl ContentBackend for WorkerBackend {
    fn send(&mut self, command: Command) -> Result<(), BackendError> {
        let sender = self.commands.as_ref().ok_or(BackendError::Stopped)?;
        let json = serde_json::to_string(&command)?;
        sender.send(json).map_err(|_| BackendError::Stopped)
    }

    fn poll_events(&mut self) -> Vec<Event> {
        let Some(receiver) = self.events.as_mut() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        while let Ok(json) = receiver.try_recv() {
            match serde_json::from_str::<Event>(&json) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "failed to decode worker event"),
            }
        }
        events
    }

    fn shutdown(&mut self) {
        if self.commands.is_none() {
            return;
        }
        self.cancel.cancel();
        self.commands = None;
        self.events = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("content worker thread panicked");
            }
        }
        info!("content worker stopped");
    }

    fn is_running(&self) -> bool {
        self.commands.is_some()
            && self
                .thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for WorkerBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
