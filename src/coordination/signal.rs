//! Named broadcast signals
//!
//! A `Signal` delivers each emitted event synchronously, in subscription
//! order, to every registered listener. Listeners may be one-shot, can be
//! removed individually or all at once, and async observers can take a
//! `broadcast::Receiver` tap instead of registering a callback.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Capacity of the async tap channel
pub const DEFAULT_TAP_CAPACITY: usize = 256;

/// Identifies one listener registration on a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E> {
    id: SubscriptionId,
    once: bool,
    callback: Callback<E>,
}

/// A named broadcast channel with synchronous, ordered delivery
pub struct Signal<E> {
    name: String,
    listeners: Mutex<Vec<Listener<E>>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<E>,
}

impl<E> Signal<E>
where
    E: Clone + Send + 'static,
{
    /// Create a signal with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let (tap, _) = broadcast::channel(DEFAULT_TAP_CAPACITY);
        Self {
            name: name.into(),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tap,
        }
    }

    /// Name this signal was created with
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener called for every emitted event
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        self.register(callback, false)
    }

    /// Register a listener called for the next emitted event only
    pub fn subscribe_once(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        self.register(callback, true)
    }

    fn register(&self, callback: impl Fn(&E) + Send + Sync + 'static, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Listener {
            id,
            once,
            callback: Arc::new(callback),
        });
        tracing::trace!(signal = %self.name, once, "listener registered");
        id
    }

    /// Remove one listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Remove every listener
    pub fn unsubscribe_all(&self) {
        let removed = {
            let mut listeners = self.listeners.lock();
            let count = listeners.len();
            listeners.clear();
            count
        };
        tracing::trace!(signal = %self.name, removed, "listeners cleared");
    }

    /// Number of registered callback listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver an event to all listeners, then to async taps
    ///
    /// The listener list is snapshotted before delivery, so a listener may
    /// subscribe or unsubscribe from inside its own callback.
    pub fn emit(&self, event: E) {
        let callbacks: Vec<Callback<E>> = {
            let mut listeners = self.listeners.lock();
            let snapshot = listeners.iter().map(|l| l.callback.clone()).collect();
            listeners.retain(|l| !l.once);
            snapshot
        };

        for callback in &callbacks {
            callback(&event);
        }

        if self.tap.receiver_count() > 0 {
            let _ = self.tap.send(event);
        }
    }

    /// Receive events asynchronously
    ///
    /// Only events emitted after this call are received.
    pub fn tap(&self) -> broadcast::Receiver<E> {
        self.tap.subscribe()
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
