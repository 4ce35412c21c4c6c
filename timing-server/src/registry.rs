//! The server-side state held per timing object: its vector, its optional range, and the set of
//! connections currently subscribed to its `change` broadcasts.
//!
//! Objects are created lazily, on first `info` for an unseen id, and live for the process
//! lifetime — there is no explicit deletion, matching the distilled protocol's "objects are
//! addressed, never declared" model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use timing_core::protocol::{ServerMessage, VectorPayload};
use timing_core::{vector::now_seconds, Interval, StateVector};

/// Opaque per-connection identity used only as a subscriber-map key.
pub type ConnectionId = u64;

struct ObjectState {
    vector: StateVector,
    range: Option<Interval>,
    subscribers: HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl ObjectState {
    fn fresh() -> Self {
        ObjectState {
            vector: StateVector::zero(),
            range: None,
            subscribers: HashMap::new(),
        }
    }
}

/// The process-wide table of timing objects, plus the reference-clock offset advertised to
/// every client's `sync` requests.
pub struct Registry {
    objects: Mutex<HashMap<String, Arc<Mutex<ObjectState>>>>,
    delta_ms: i64,
}

impl Registry {
    pub fn new(delta_ms: i64) -> Arc<Self> {
        Arc::new(Registry {
            objects: Mutex::new(HashMap::new()),
            delta_ms,
        })
    }

    fn object(&self, id: &str) -> Arc<Mutex<ObjectState>> {
        self.objects
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ObjectState::fresh())))
            .clone()
    }

    /// Register `sender` as a subscriber of `id` (creating it if unseen) and return the vector
    /// to answer the originating `info` request with, extrapolated to now.
    pub fn handle_info(
        &self,
        id: &str,
        conn: ConnectionId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> StateVector {
        let object = self.object(id);
        let mut state = object.lock().unwrap();
        state.subscribers.insert(conn, sender);
        state.vector.extrapolate(now_seconds())
    }

    /// Apply an update to `id` (a no-op, with a warning, if `id` has never been seen via
    /// `info`), clamp into its range, and broadcast the resulting `change` to every subscriber.
    pub fn handle_update(&self, id: &str, requested: VectorPayload) {
        let object = {
            let objects = self.objects.lock().unwrap();
            match objects.get(id) {
                Some(object) => object.clone(),
                None => {
                    warn!(id, "update for an unknown timing object, dropping");
                    return;
                }
            }
        };

        let (vector, subscribers) = {
            let mut state = object.lock().unwrap();
            let now = now_seconds();
            let extrapolated = state.vector.extrapolate(now);
            let mut next = StateVector::new(
                requested.position.unwrap_or(extrapolated.position),
                requested.velocity.unwrap_or(extrapolated.velocity),
                requested.acceleration.unwrap_or(extrapolated.acceleration),
                Some(now),
            );
            if let Some(range) = state.range {
                next.position = range.clamp(next.position);
            }
            state.vector = next;
            let subscribers: Vec<_> = state
                .subscribers
                .iter()
                .map(|(conn, sender)| (*conn, sender.clone()))
                .collect();
            (next, subscribers)
        };

        let message = ServerMessage::Change {
            id: id.to_string(),
            vector: vector.into(),
        };
        let mut dead = Vec::new();
        for (conn, sender) in subscribers {
            if sender.send(message.clone()).is_err() {
                dead.push(conn);
            }
        }
        if !dead.is_empty() {
            let mut state = object.lock().unwrap();
            for conn in dead {
                state.subscribers.remove(&conn);
            }
        }
    }

    /// Set (or clear) the clamping range for `id`, creating the object if unseen. Existing
    /// position is re-clamped immediately but no `change` is broadcast for the re-clamp itself,
    /// mirroring the originating protocol, which has no wire message for range configuration —
    /// this is exposed only for embedders constructing a `Registry` directly.
    pub fn set_range(&self, id: &str, range: Option<Interval>) {
        let object = self.object(id);
        let mut state = object.lock().unwrap();
        state.range = range;
        if let Some(range) = range {
            state.vector.position = range.clamp(state.vector.position);
        }
    }

    /// The reference-clock offset (milliseconds) this server advertises in every `sync` reply.
    pub fn delta_ms(&self) -> i64 {
        self.delta_ms
    }

    /// Remove `conn` from every object's subscriber set, on disconnect.
    pub fn disconnect(&self, conn: ConnectionId) {
        let objects = self.objects.lock().unwrap();
        for object in objects.values() {
            object.lock().unwrap().subscribers.remove(&conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn info_creates_the_object_on_first_sight() {
        let registry = Registry::new(0);
        let (tx, _rx) = sender();
        let vector = registry.handle_info("/clock", 1, tx);
        assert_eq!(vector.position, 0.0);
    }

    #[test]
    fn update_broadcasts_to_every_subscriber_including_the_originator() {
        let registry = Registry::new(0);
        let (tx1, mut rx1) = sender();
        let (tx2, mut rx2) = sender();
        registry.handle_info("/clock", 1, tx1);
        registry.handle_info("/clock", 2, tx2);

        registry.handle_update(
            "/clock",
            VectorPayload {
                position: Some(5.0),
                velocity: Some(1.0),
                acceleration: None,
                timestamp: None,
            },
        );

        let m1 = rx1.try_recv().unwrap();
        let m2 = rx2.try_recv().unwrap();
        match (m1, m2) {
            (
                ServerMessage::Change { vector: v1, .. },
                ServerMessage::Change { vector: v2, .. },
            ) => {
                assert_eq!(v1.position, Some(5.0));
                assert_eq!(v2.position, Some(5.0));
            }
            _ => panic!("expected Change on both subscribers"),
        }
    }

    #[test]
    fn update_for_unknown_id_is_dropped_without_panicking() {
        let registry = Registry::new(0);
        registry.handle_update(
            "/never-seen",
            VectorPayload {
                position: Some(1.0),
                velocity: None,
                acceleration: None,
                timestamp: None,
            },
        );
    }

    #[test]
    fn update_clamps_into_a_configured_range() {
        let registry = Registry::new(0);
        registry.set_range("/clock", Some(Interval::closed(0.0, 10.0)));
        registry.handle_update(
            "/clock",
            VectorPayload {
                position: Some(100.0),
                velocity: None,
                acceleration: None,
                timestamp: None,
            },
        );
        let (tx, _rx) = sender();
        let vector = registry.handle_info("/clock", 1, tx);
        assert_eq!(vector.position, 10.0);
    }

    #[test]
    fn disconnect_stops_further_broadcasts_to_that_connection() {
        let registry = Registry::new(0);
        let (tx, rx) = sender();
        registry.handle_info("/clock", 1, tx);
        drop(rx);
        registry.disconnect(1);

        registry.handle_update(
            "/clock",
            VectorPayload {
                position: Some(1.0),
                velocity: None,
                acceleration: None,
                timestamp: None,
            },
        );
    }

    #[test]
    fn delta_ms_is_fixed_at_construction() {
        let registry = Registry::new(42);
        assert_eq!(registry.delta_ms(), 42);
    }
}
