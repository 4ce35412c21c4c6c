//! The user-facing façade: owns exactly one [`TimingProvider`] at a time and can switch
//! between a locally-mastered motion and an externally supplied one at runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use timing_core::{EventBus, Interval, ListenerId, ReadyState, StateVector, TimingError};

use crate::provider::{LocalTimingProvider, TimingFuture, TimingProvider, UpdateRequest};

/// How often `timeupdate` fires while the timing object is moving.
const TIMEUPDATE_HZ: u64 = 5;

struct ProviderSlot {
    provider: Arc<dyn TimingProvider>,
    master: bool,
    change_listener: ListenerId,
    ready_listener: ListenerId,
}

struct ObjectInner {
    slot: Mutex<Option<ProviderSlot>>,
    change_bus: EventBus<StateVector>,
    ready_state_bus: EventBus<ReadyState>,
    timeupdate_bus: EventBus<()>,
    moving: AtomicBool,
}

impl ObjectInner {
    fn with_slot<R>(&self, f: impl FnOnce(&ProviderSlot) -> R) -> R {
        let guard = self.slot.lock().unwrap();
        f(guard.as_ref().expect("provider slot is always populated after construction"))
    }
}

/// The consumer-facing handle to a synchronized motion: `query`, `update`, `is_moving`, and a
/// swappable `srcObject` (master/slave switching).
#[derive(Clone)]
pub struct TimingObject {
    inner: Arc<ObjectInner>,
}

impl TimingObject {
    /// A locally-mastered object at rest at the origin.
    pub fn new() -> Self {
        Self::from_provider(
            Arc::new(LocalTimingProvider::new(StateVector::zero(), None)),
            true,
        )
    }

    /// A slave object bound to an externally supplied provider (typically a
    /// [`crate::provider::SocketTimingProvider`]).
    pub fn with_provider(provider: Arc<dyn TimingProvider>) -> Self {
        Self::from_provider(provider, false)
    }

    fn from_provider(provider: Arc<dyn TimingProvider>, master: bool) -> Self {
        let inner = Arc::new(ObjectInner {
            slot: Mutex::new(None),
            change_bus: EventBus::new(),
            ready_state_bus: EventBus::new(),
            timeupdate_bus: EventBus::new(),
            moving: AtomicBool::new(false),
        });

        attach(&inner, provider, master);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let ticker_inner = Arc::downgrade(&inner);
            handle.spawn(async move { run_ticker(ticker_inner).await });
        }

        TimingObject { inner }
    }

    pub fn query(&self) -> StateVector {
        self.inner.with_slot(|slot| slot.provider.query())
    }

    pub fn range(&self) -> Option<Interval> {
        self.inner.with_slot(|slot| slot.provider.range())
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.with_slot(|slot| slot.provider.ready_state())
    }

    /// Whether the current vector describes motion.
    pub fn is_moving(&self) -> bool {
        self.inner.with_slot(|slot| slot.provider.vector().is_moving())
    }

    pub fn update(&self, request: UpdateRequest) -> TimingFuture<Result<(), TimingError>> {
        let provider = self.inner.with_slot(|slot| slot.provider.clone());
        provider.update(request)
    }

    /// `true` when this object is mastered by a local clock rather than slaved to an external
    /// provider.
    pub fn is_master(&self) -> bool {
        self.inner.with_slot(|slot| slot.master)
    }

    /// The external provider this object is bound to, or `None` when locally mastered.
    pub fn src_object(&self) -> Option<Arc<dyn TimingProvider>> {
        self.inner.with_slot(|slot| {
            if slot.master {
                None
            } else {
                Some(slot.provider.clone())
            }
        })
    }

    /// Bind to `provider`, or detach back to a local master (seeded from the last `query()` of
    /// whatever provider was previously attached) when `provider` is `None`.
    pub fn set_src_object(&self, provider: Option<Arc<dyn TimingProvider>>) {
        match provider {
            Some(provider) => attach(&self.inner, provider, false),
            None => {
                let seed = self.query();
                let local = Arc::new(LocalTimingProvider::new(seed, None));
                attach(&self.inner, local, true);
            }
        }
    }

    pub fn on_change(&self, listener: Box<dyn Fn(StateVector) + Send + Sync>) -> ListenerId {
        self.inner.change_bus.subscribe(move |event| listener(*event))
    }

    pub fn off_change(&self, id: ListenerId) {
        self.inner.change_bus.unsubscribe(id);
    }

    pub fn on_ready_state_change(
        &self,
        listener: Box<dyn Fn(ReadyState) + Send + Sync>,
    ) -> ListenerId {
        self.inner
            .ready_state_bus
            .subscribe(move |event| listener(*event))
    }

    pub fn off_ready_state_change(&self, id: ListenerId) {
        self.inner.ready_state_bus.unsubscribe(id);
    }

    pub fn on_timeupdate(&self, listener: Box<dyn Fn(()) + Send + Sync>) -> ListenerId {
        self.inner.timeupdate_bus.subscribe(move |event| listener(*event))
    }

    pub fn off_timeupdate(&self, id: ListenerId) {
        self.inner.timeupdate_bus.unsubscribe(id);
    }
}

impl Default for TimingObject {
    fn default() -> Self {
        Self::new()
    }
}

fn attach(inner: &Arc<ObjectInner>, provider: Arc<dyn TimingProvider>, master: bool) {
    let mut guard = inner.slot.lock().unwrap();
    if let Some(old) = guard.take() {
        old.provider.off_change(old.change_listener);
        old.provider.off_ready_state_change(old.ready_listener);
    }

    let change_inner = inner.clone();
    let change_listener = provider.on_change(Box::new(move |vector| {
        change_inner.moving.store(vector.is_moving(), Ordering::Release);
        change_inner.change_bus.emit(&vector);
    }));

    let ready_inner = inner.clone();
    let ready_listener = provider.on_ready_state_change(Box::new(move |state| {
        if state.is_closed() {
            ready_inner.moving.store(false, Ordering::Release);
        }
        ready_inner.ready_state_bus.emit(&state);
    }));

    inner
        .moving
        .store(provider.vector().is_moving(), Ordering::Release);

    *guard = Some(ProviderSlot {
        provider,
        master,
        change_listener,
        ready_listener,
    });
}

/// Self-terminating: holds only a [`Weak`] reference, so once every [`TimingObject`] handle
/// sharing this `ObjectInner` is dropped the next tick finds nothing to upgrade to and the task
/// exits instead of keeping the provider/channel/clock alive forever.
async fn run_ticker(inner: Weak<ObjectInner>) {
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / TIMEUPDATE_HZ));
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.moving.load(Ordering::Acquire) {
            inner.timeupdate_bus.emit(&());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_as_a_local_master_at_rest() {
        let object = TimingObject::new();
        assert!(object.is_master());
        assert!(!object.is_moving());
        assert_eq!(object.query().position, 0.0);
    }

    #[tokio::test]
    async fn update_is_forwarded_to_the_current_provider() {
        let object = TimingObject::new();
        object
            .update(UpdateRequest {
                position: Some(1.0),
                velocity: Some(2.0),
                acceleration: None,
            })
            .await
            .unwrap();
        assert!(object.is_moving());
        assert_eq!(object.query().velocity, 2.0);
    }

    #[tokio::test]
    async fn detaching_src_object_seeds_a_new_local_master_from_last_query() {
        let remote = Arc::new(LocalTimingProvider::new(
            StateVector::new(3.0, 1.0, 0.0, Some(0.0)),
            None,
        ));
        let object = TimingObject::with_provider(remote);
        assert!(!object.is_master());

        object.set_src_object(None);
        assert!(object.is_master());
        assert!(object.query().position >= 3.0);
    }

    #[tokio::test]
    async fn change_events_propagate_from_the_active_provider() {
        let object = TimingObject::new();
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let s = seen.clone();
        object.on_change(Box::new(move |_| {
            s.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        object
            .update(UpdateRequest {
                position: Some(1.0),
                velocity: None,
                acceleration: None,
            })
            .await
            .unwrap();
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
