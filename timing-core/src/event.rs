//! A small typed publish/subscribe bus.
//!
//! Listeners registered before an `emit()` call are invoked synchronously, in registration
//! order. This module has no opinion on *when* to defer a dispatch to "the next tick" — that
//! policy (used for the initial `readystatechange`, see the timing-client crate) belongs to the
//! async runtime the caller is embedded in, so this crate stays runtime-agnostic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque handle returned by [`EventBus::subscribe`], used to [`EventBus::unsubscribe`] later.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered collection of listeners for events of type `E`.
pub struct EventBus<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        EventBus {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning a handle that can later be passed to
    /// [`EventBus::unsubscribe`].
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered listener. No-op if already removed.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Invoke every currently-registered listener with `event`, in registration order.
    pub fn emit(&self, event: &E) {
        // Clone the Arc'd handlers out from under the lock before calling any of them, so a
        // handler that subscribes or unsubscribes (or emits again) cannot deadlock on this
        // same mutex.
        let snapshot: Vec<Listener<E>> = {
            let guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
            guard.iter().map(|(_, handler)| handler.clone()).collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn emit_calls_listeners_in_order() {
        let bus: EventBus<i32> = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |event| o1.lock().unwrap().push(("first", *event)));
        let o2 = order.clone();
        bus.subscribe(move |event| o2.lock().unwrap().push(("second", *event)));

        bus.emit(&42);

        assert_eq!(
            *order.lock().unwrap(),
            vec![("first", 42), ("second", 42)]
        );
    }

    #[test]
    fn unsubscribe_stops_future_dispatch() {
        let bus: EventBus<i32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&1);
        bus.unsubscribe(id);
        bus.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_count_reflects_subscriptions() {
        let bus: EventBus<()> = EventBus::new();
        assert_eq!(bus.listener_count(), 0);
        let id = bus.subscribe(|_| {});
        assert_eq!(bus.listener_count(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.listener_count(), 0);
    }
}
