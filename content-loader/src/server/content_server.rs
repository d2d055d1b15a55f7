//! Request scheduler.
//!
//! [`ContentServer`] owns the origin registry and the named caches, turns
//! [`Command`]s into cache and network work, and publishes [`Event`]s.
//!
//! # Execution Model
//!
//! All state lives in the server and is mutated only through
//! [`handle_command`](ContentServer::handle_command) and
//! [`apply`](ContentServer::apply), both of which take `&mut self`. Cache
//! opens, deletes and fetches run as tasks on a tokio runtime; their results
//! come back as [`Completion`]s through a [`CompletionQueue`] that the owner
//! drains on its own schedule. Origin load counters are therefore only ever
//! touched from one place, in order.
//!
//! ```text
//!  Command ──► handle_command ──► spawn(open / delete / fetch)
//!                                          │
//!  Event ◄── apply ◄── CompletionQueue ◄───┘
//! ```
//!
//! Lifecycle work for the same cache name is chained: an open issued after a
//! delete waits for the delete to finish.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::error::ServerError;
use super::origins::{compose_url, OriginId, OriginRegistry};
use super::protocol::{Command, Event, GetResource, ResourceData, ResponseType};
use crate::cache::{CacheState, DataStore, RequestEvent, StorageFactory, StoreEvent};
use crate::emitter::Emitter;
use crate::transport::Transport;

/// Result of background work, to be passed to [`ContentServer::apply`].
#[derive(Debug)]
pub struct Completion(CompletionKind);

#[derive(Debug)]
enum CompletionKind {
    CacheOpened {
        name: String,
        generation: u64,
        store: Arc<DataStore>,
        result: Result<(), String>,
    },
    CacheDeleted {
        name: String,
        result: Result<(), String>,
    },
    CacheClosing {
        name: String,
    },
    Request {
        ticket: u64,
        event: RequestEvent,
    },
}

/// Receiving side for background results.
#[derive(Debug)]
pub struct CompletionQueue {
    receiver: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionQueue {
    /// Wait for the next completion.
    pub async fn next(&mut self) -> Option<Completion> {
        self.receiver.recv().await
    }

    /// Take a completion if one is ready.
    pub fn try_next(&mut self) -> Option<Completion> {
        self.receiver.try_recv().ok()
    }
}

/// A request that has been dispatched and not yet terminated.
#[derive(Debug)]
struct InFlight {
    request_id: String,
    cache_name: String,
    /// The cache closed while the fetch was running. The fetch keeps its own
    /// backend handle, so only the write-back is affected.
    cache_closed: bool,
    origin: OriginId,
    url: String,
    resource_name: String,
    response_type: ResponseType,
    last_percent: Option<u8>,
}

struct PendingOpen {
    generation: u64,
    store: Arc<DataStore>,
}

/// Multi-origin request scheduler with named caches.
pub struct ContentServer {
    origins: OriginRegistry,
    caches: HashMap<String, Arc<DataStore>>,
    opening: HashMap<String, PendingOpen>,
    lifecycle: HashMap<String, JoinHandle<()>>,
    in_flight: HashMap<u64, InFlight>,
    next_ticket: u64,
    next_generation: u64,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn StorageFactory>,
    runtime: Handle,
    completions: mpsc::UnboundedSender<Completion>,
    events: Emitter<Event>,
}

impl ContentServer {
    /// Create a server that runs background work on `runtime`.
    ///
    /// The application origin (the empty URL) is registered up front.
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StorageFactory>,
        runtime: Handle,
    ) -> (Self, CompletionQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut origins = OriginRegistry::new();
        origins.add("");

        let server = Self {
            origins,
            caches: HashMap::new(),
            opening: HashMap::new(),
            lifecycle: HashMap::new(),
            in_flight: HashMap::new(),
            next_ticket: 0,
            next_generation: 0,
            transport,
            storage,
            runtime,
            completions: sender,
            events: Emitter::new(),
        };
        (server, CompletionQueue { receiver })
    }

    /// Outbound events.
    pub fn events(&self) -> &Emitter<Event> {
        &self.events
    }

    pub fn origins(&self) -> &OriginRegistry {
        &self.origins
    }

    /// State of the named cache, if the server knows it.
    pub fn cache_state(&self, name: &str) -> Option<CacheState> {
        self.caches
            .get(name)
            .or_else(|| self.opening.get(name).map(|pending| &pending.store))
            .map(|store| store.state())
    }

    /// Number of requests dispatched and not yet terminated.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// In-flight requests whose cache has closed since they were dispatched.
    pub fn in_flight_on_closed_caches(&self) -> usize {
        self.in_flight.values().filter(|f| f.cache_closed).count()
    }

    /// Dispatch one command.
    pub fn handle_command(&mut self, command: Command) {
        trace!(?command, "handling command");
        match command {
            Command::AddOrigin { url } => {
                self.origins.add(&url);
            }
            Command::RemoveOrigin { url } => {
                self.origins.remove(&url);
            }
            Command::OpenCache { name } => self.open_cache(name),
            Command::DeleteCache { name } => self.delete_cache(name),
            Command::GetResource(args) => self.request_resource(args),
        }
    }

    /// Apply the result of background work.
    pub fn apply(&mut self, completion: Completion) {
        match completion.0 {
            CompletionKind::CacheOpened {
                name,
                generation,
                store,
                result,
            } => self.on_cache_opened(name, generation, store, result),
            CompletionKind::CacheDeleted { name, result } => match result {
                Ok(()) => info!(cache = %name, "cache deleted"),
                Err(message) => {
                    warn!(cache = %name, error = %message, "cache delete failed");
                    self.emit(Event::Error {
                        message: format!("failed to delete cache {}: {}", name, message),
                        request_id: None,
                    });
                }
            },
            CompletionKind::CacheClosing { name } => self.on_cache_closing(&name),
            CompletionKind::Request { ticket, event } => self.on_request_event(ticket, event),
        }
    }

    /// Apply every completion already waiting in `queue`.
    ///
    /// Returns the number applied.
    pub fn process_pending(&mut self, queue: &mut CompletionQueue) -> usize {
        let mut applied = 0;
        while let Some(completion) = queue.try_next() {
            self.apply(completion);
            applied += 1;
        }
        applied
    }

    // =========================================================================
    // Cache lifecycle
    // =========================================================================

    fn open_cache(&mut self, name: String) {
        if let Some(store) = self.caches.get(&name) {
            if store.is_ready() {
                self.emit(Event::CacheReady { name });
                return;
            }
            self.caches.remove(&name);
        }
        if self.opening.contains_key(&name) {
            debug!(cache = %name, "cache already opening");
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let store = Arc::new(DataStore::new(name.clone()));
        self.opening.insert(
            name.clone(),
            PendingOpen {
                generation,
                store: Arc::clone(&store),
            },
        );

        let storage = Arc::clone(&self.storage);
        let sender = self.completions.clone();
        let task_name = name.clone();
        self.schedule(&name, async move {
            let result = store
                .open(storage.as_ref())
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(Completion(CompletionKind::CacheOpened {
                name: task_name,
                generation,
                store,
                result,
            }));
        });
    }

    fn delete_cache(&mut self, name: String) {
        let store = self
            .caches
            .remove(&name)
            .or_else(|| self.opening.remove(&name).map(|pending| pending.store));

        let storage = Arc::clone(&self.storage);
        let sender = self.completions.clone();
        let task_name = name.clone();
        self.schedule(&name, async move {
            if let Some(store) = store {
                store.close().await;
            }
            let result = storage
                .destroy(&task_name)
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(Completion(CompletionKind::CacheDeleted {
                name: task_name,
                result,
            }));
        });
    }

    /// Run `work` after any earlier lifecycle work for `name`.
    fn schedule<F>(&mut self, name: &str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.lifecycle.remove(name);
        let handle = self.runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            work.await;
        });
        self.lifecycle.insert(name.to_string(), handle);
    }

    fn on_cache_opened(
        &mut self,
        name: String,
        generation: u64,
        store: Arc<DataStore>,
        result: Result<(), String>,
    ) {
        let current = self
            .opening
            .get(&name)
            .is_some_and(|pending| pending.generation == generation);
        if !current {
            debug!(cache = %name, "ignoring superseded cache open");
            return;
        }
        self.opening.remove(&name);

        match result {
            Ok(()) => {
                let sender = self.completions.clone();
                store.events().subscribe(move |event| {
                    if let StoreEvent::Closing { name } = event {
                        let _ = sender.send(Completion(CompletionKind::CacheClosing {
                            name: name.clone(),
                        }));
                    }
                });
                self.caches.insert(name.clone(), store);
                self.emit(Event::CacheReady { name });
            }
            Err(message) => {
                let error = ServerError::Cache {
                    name,
                    source: crate::cache::CacheError::Backend(message),
                };
                self.emit(Event::Error {
                    message: error.to_string(),
                    request_id: None,
                });
            }
        }
    }

    fn on_cache_closing(&mut self, name: &str) {
        let mut affected = 0;
        for flight in self.in_flight.values_mut() {
            if flight.cache_name == name {
                flight.cache_closed = true;
                affected += 1;
            }
        }
        info!(cache = %name, in_flight = affected, "cache closing");
    }

    // =========================================================================
    // Requests
    // =========================================================================

    fn request_resource(&mut self, args: GetResource) {
        let store = match self.caches.get(&args.cache_name) {
            Some(store) if store.is_ready() => Arc::clone(store),
            _ => {
                debug!(
                    request_id = %args.request_id,
                    cache = %args.cache_name,
                    "request against unavailable cache"
                );
                self.emit_request_error(
                    &args.request_id,
                    ServerError::CacheNotReady(args.cache_name.clone()),
                );
                return;
            }
        };

        let (origin, origin_url) = match self.origins.resolve(args.preferred_origin.as_deref()) {
            Some(record) => (record.id(), record.url().to_string()),
            None => {
                self.emit_request_error(&args.request_id, ServerError::NoOrigin);
                return;
            }
        };

        let url = compose_url(&origin_url, &args.resource_name);
        let request = match store.create_request(
            &args.resource_name,
            &url,
            args.response_type.as_str(),
            Arc::clone(&self.transport),
        ) {
            Ok(request) => request,
            Err(e) => {
                self.emit(Event::Error {
                    message: e.to_string(),
                    request_id: Some(args.request_id),
                });
                return;
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let sender = self.completions.clone();
        request.events().subscribe(move |event| {
            let _ = sender.send(Completion(CompletionKind::Request {
                ticket,
                event: event.clone(),
            }));
        });

        self.origins.acquire(origin);
        debug!(
            request_id = %args.request_id,
            origin = %origin_url,
            url = %url,
            cached = args.return_cached,
            "dispatching request"
        );
        self.in_flight.insert(
            ticket,
            InFlight {
                request_id: args.request_id,
                cache_name: args.cache_name,
                cache_closed: false,
                origin,
                url,
                resource_name: args.resource_name,
                response_type: args.response_type,
                last_percent: None,
            },
        );

        let check_cache = args.return_cached;
        self.runtime.spawn(async move {
            let _ = request.start(check_cache).await;
        });
    }

    fn on_request_event(&mut self, ticket: u64, event: RequestEvent) {
        match event {
            RequestEvent::Progress(progress) => {
                let Some(flight) = self.in_flight.get_mut(&ticket) else {
                    return;
                };
                let percent = progress.percent();
                if flight.last_percent.is_some_and(|last| percent <= last) {
                    return;
                }
                flight.last_percent = Some(percent);
                let event = Event::Progress {
                    request_id: flight.request_id.clone(),
                    percent,
                };
                self.events.publish(&event);
            }
            RequestEvent::Data(data) => {
                let Some(flight) = self.finish(ticket) else {
                    return;
                };
                if flight.cache_closed {
                    debug!(
                        request_id = %flight.request_id,
                        cache = %flight.cache_name,
                        "delivering data fetched across a cache close"
                    );
                }
                match ResourceData::decode(&flight.resource_name, flight.response_type, data) {
                    Ok(data) => self.emit(Event::ResourceData {
                        request_id: flight.request_id,
                        resource_url: flight.url,
                        resource_name: flight.resource_name,
                        data,
                        response_type: flight.response_type,
                    }),
                    Err(e) => self.emit_request_error(&flight.request_id, e),
                }
            }
            RequestEvent::Error(message) => {
                let Some(flight) = self.finish(ticket) else {
                    return;
                };
                self.emit(Event::Error {
                    message,
                    request_id: Some(flight.request_id),
                });
            }
        }
    }

    /// Move a request to its terminal state.
    ///
    /// Returns `None` if it already terminated, so late callbacks are dropped
    /// and the origin is released exactly once.
    fn finish(&mut self, ticket: u64) -> Option<InFlight> {
        let Some(flight) = self.in_flight.remove(&ticket) else {
            trace!(ticket, "ignoring event for finished request");
            return None;
        };
        self.origins.release(flight.origin);
        debug!(request_id = %flight.request_id, url = %flight.url, "request finished");
        Some(flight)
    }

    fn emit_request_error(&self, request_id: &str, error: ServerError) {
        self.emit(Event::Error {
            message: error.to_string(),
            request_id: Some(request_id.to_string()),
        });
    }

    fn emit(&self, event: Event) {
        self.events.publish(&event);
    }
}

impl std::fmt::Debug for ContentServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentServer")
            .field("origins", &self.origins.len())
            .field("caches", &self.caches.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
