use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use timing_core::{EventBus, Interval, ListenerId, ReadyState, StateVector, TimingError};

use super::{TimingFuture, TimingProvider, UpdateRequest};

/// A timing object driven entirely by the local wall clock. `readyState` is `open` from
/// construction; like [`crate::sync::LocalSyncClock`], it never transitions, so no
/// `readystatechange` event is ever observable.
pub struct LocalTimingProvider {
    vector: Mutex<StateVector>,
    range: Option<Interval>,
    closed: AtomicBool,
    change_bus: EventBus<StateVector>,
    ready_state_bus: EventBus<ReadyState>,
}

impl LocalTimingProvider {
    pub fn new(vector: StateVector, range: Option<Interval>) -> Self {
        LocalTimingProvider {
            vector: Mutex::new(vector),
            range,
            closed: AtomicBool::new(false),
            change_bus: EventBus::new(),
            ready_state_bus: EventBus::new(),
        }
    }
}

impl TimingProvider for LocalTimingProvider {
    fn ready_state(&self) -> ReadyState {
        if self.closed.load(Ordering::Acquire) {
            ReadyState::Closed
        } else {
            ReadyState::Open
        }
    }

    fn vector(&self) -> StateVector {
        *self.vector.lock().unwrap()
    }

    fn range(&self) -> Option<Interval> {
        self.range
    }

    fn query(&self) -> StateVector {
        let now = timing_core::vector::now_seconds();
        self.vector.lock().unwrap().extrapolate(now)
    }

    fn update(&self, request: UpdateRequest) -> TimingFuture<Result<(), TimingError>> {
        let result = self.apply(request);
        Box::pin(async move { result })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ready_state_bus.emit(&ReadyState::Closed);
    }

    fn on_change(&self, listener: Box<dyn Fn(StateVector) + Send + Sync>) -> ListenerId {
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

impl LocalTimingProvider {
    fn apply(&self, request: UpdateRequest) -> Result<(), TimingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TimingError::Closed);
        }
        let now = timing_core::vector::now_seconds();
        let mut current = self.vector.lock().unwrap();
        let extrapolated = current.extrapolate(now);

        let mut next = StateVector::new(
            request.position.unwrap_or(extrapolated.position),
            request.velocity.unwrap_or(extrapolated.velocity),
            request.acceleration.unwrap_or(extrapolated.acceleration),
            Some(now),
        );
        if let Some(range) = self.range {
            next.position = range.clamp(next.position);
        }

        let changed = !next.equivalent(&current);
        *current = next;
        drop(current);

        if changed {
            self.change_bus.emit(&next);
        }
        Ok(())
    }
}
