use timing_core::{EventBus, ListenerId, ReadyState};

use super::{SkewChange, SyncClock};

/// The trivial clock used by locally-mastered timing objects and in tests: zero skew, zero
/// delta, `open` immediately.
pub struct LocalSyncClock {
    change_bus: EventBus<SkewChange>,
    ready_state_bus: EventBus<ReadyState>,
}

impl LocalSyncClock {
    pub fn new() -> Self {
        LocalSyncClock {
            change_bus: EventBus::new(),
            ready_state_bus: EventBus::new(),
        }
    }
}

impl Default for LocalSyncClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClock for LocalSyncClock {
    fn ready_state(&self) -> ReadyState {
        ReadyState::Open
    }

    fn skew(&self) -> i64 {
        0
    }

    fn delta(&self) -> i64 {
        0
    }

    fn close(&self) {
        // Already terminal in the only state it ever has; nothing to tear down.
    }

    fn on_change(&self, listener: Box<dyn Fn(SkewChange) + Send + Sync>) -> ListenerId {
        self.change_bus.subscribe(move |event| listener(*event))
    }

    fn off_change(&self, id: ListenerId) {
        self.change_bus.unsubscribe(id);
    }

    fn on_ready_state_change(
        &self,
        listener: Box<dyn Fn(ReadyState) + Send + Sync>,
    ) -> ListenerId {
        self.ready_state_bus.subscribe(move |event| listener(*event))
    }

    fn off_ready_state_change(&self, id: ListenerId) {
        self.ready_state_bus.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncClockExt;

    #[test]
    fn is_open_with_zero_skew_and_delta_from_construction() {
        let clock = LocalSyncClock::new();
        assert_eq!(clock.ready_state(), ReadyState::Open);
        assert_eq!(clock.skew(), 0);
        assert_eq!(clock.delta(), 0);
        assert_eq!(clock.get_time(1_000), 1_000);
    }

    #[test]
    fn close_is_a_harmless_no_op() {
        let clock = LocalSyncClock::new();
        clock.close();
        clock.close();
        assert_eq!(clock.ready_state(), ReadyState::Open);
    }
}
