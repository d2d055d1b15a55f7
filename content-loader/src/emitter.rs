//! Reusable observer capability.
//!
//! [`Emitter`] owns a listener table for a single event type. Components that
//! raise notifications (caches, requests, the content server, backends and
//! the loader) hold an `Emitter` as a field rather than inheriting behaviour
//! from a shared base type.
//!
//! # Example
//!
//! ```
//! use content_loader::emitter::Emitter;
//!
//! let emitter: Emitter<u32> = Emitter::new();
//! let id = emitter.subscribe(|value| assert_eq!(*value, 7));
//!
//! assert_eq!(emitter.publish(&7), 1);
//! assert!(emitter.unsubscribe(id));
//! assert_eq!(emitter.publish(&7), 0);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`Emitter::subscribe`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A listener table for events of type `E`.
///
/// Listeners are invoked in registration order. Publishing takes a snapshot
/// of the table first, so a listener may subscribe or unsubscribe while it is
/// being invoked without deadlocking; such changes apply to the next publish.
pub struct Emitter<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Emitter<E> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered listener.
    ///
    /// Returns `false` if the listener was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Remove every listener.
    pub fn unsubscribe_all(&self) {
        self.listeners.lock().clear();
    }

    /// Invoke every listener with `event`.
    ///
    /// Returns the number of listeners invoked.
    pub fn publish(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
