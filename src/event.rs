//! Subscription lists for scanner and device notifications.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// An ordered list of subscriber callbacks.
///
/// Emission iterates over a snapshot of the list, so a handler may subscribe
/// or unsubscribe (including itself) while an emission is in flight.
/// Handlers run on whichever thread emits (for scanner and device events,
/// the background thread) and never under an internal lock.
pub struct Event<T> {
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Event<T> {
    pub(crate) fn new() -> Self {
        Event {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Adds a handler, returning the id [`unsubscribe`](Self::unsubscribe)
    /// accepts. Handlers fire in subscription order.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().unwrap().push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns false when the id was already gone.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub(crate) fn emit(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = {
            let handlers = self.handlers.lock().unwrap();
            handlers.iter().map(|(_, handler)| handler.clone()).collect()
        };
        for handler in snapshot {
            handler(value);
        }
    }
}
