//! Listener registry keyed by event name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;

/// Callback invoked with the payload of a matching event.
pub type Listener = Arc<dyn Fn(&JsonValue) + Send + Sync>;

/// Callback invoked with a runtime error raised by the channel.
pub type ErrorListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned on registration; pass it to [`EventEmitter::off`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Named-event listener registry.
///
/// - Listeners for one event run in registration order.
/// - The registry is snapshotted before dispatch, so a listener may register,
///   remove listeners, or tear down its channel without deadlocking.
/// - `once` listeners are removed before they run and fire at most once, even
///   under concurrent dispatch.
pub struct EventEmitter<E> {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    error_listeners: Mutex<Vec<(ListenerId, ErrorListener<E>)>>,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&JsonValue) + Send + Sync + 'static,
    {
        self.register(event.into(), false, Arc::new(listener))
    }

    /// Register a listener that is removed after its first invocation.
    pub fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&JsonValue) + Send + Sync + 'static,
    {
        self.register(event.into(), true, Arc::new(listener))
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: ErrorListener<E> = Arc::new(listener);
        lock(&self.error_listeners).push((id, listener));
        id
    }

    /// Remove a listener (event or error). Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut removed = false;

        {
            let mut listeners = lock(&self.listeners);
            for entries in listeners.values_mut() {
                let before = entries.len();
                entries.retain(|e| e.id != id);
                removed |= entries.len() != before;
            }
            listeners.retain(|_, entries| !entries.is_empty());
        }

        if !removed {
            let mut errors = lock(&self.error_listeners);
            let before = errors.len();
            errors.retain(|(eid, _)| *eid != id);
            removed = errors.len() != before;
        }

        removed
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners).get(event).map(Vec::len).unwrap_or(0)
    }

    /// Invoke every listener registered for `event`. Returns how many ran.
    pub fn dispatch(&self, event: &str, data: &JsonValue) -> usize {
        let snapshot: Vec<Listener> = {
            let mut listeners = lock(&self.listeners);
            let Some(entries) = listeners.get_mut(event) else {
                return 0;
            };

            let snapshot: Vec<Listener> = entries.iter().map(|e| e.listener.clone()).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                listeners.remove(event);
            }
            snapshot
        };

        for listener in &snapshot {
            listener(data);
        }
        snapshot.len()
    }

    /// Invoke every error listener. Returns how many ran.
    pub fn dispatch_error(&self, error: &E) -> usize {
        let snapshot: Vec<ErrorListener<E>> = lock(&self.error_listeners)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in &snapshot {
            listener(error);
        }
        snapshot.len()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        lock(&self.listeners).clear();
        lock(&self.error_listeners).clear();
    }

    fn register(&self, event: String, once: bool, listener: Listener) -> ListenerId {
        let id = self.next_id();
        lock(&self.listeners).entry(event).or_default().push(Entry {
            id,
            once,
            listener,
        });
        id
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
            error_listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> core::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let events: Vec<(String, usize)> = lock(&self.listeners)
            .iter()
            .map(|(name, entries)| (name.clone(), entries.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &events)
            .field("error_listeners", &lock(&self.error_listeners).len())
            .finish()
    }
}

// Listeners never run while a registry lock is held, so a poisoned lock only
// means a panic elsewhere; the data itself is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
