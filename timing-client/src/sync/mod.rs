//! Translating local wall-clock time into the server's reference clock.

mod local;
mod socket;

pub use local::LocalSyncClock;
pub use socket::{SocketSyncClock, SyncTuning};

use std::time::{SystemTime, UNIX_EPOCH};

use timing_core::{ListenerId, ReadyState};

/// Milliseconds since the Unix epoch, in the local wall clock.
pub fn local_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Emitted by a [`SyncClock`] whenever `skew` or `delta` actually changes value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SkewChange {
    pub skew: i64,
    pub delta: i64,
}

/// The contract every clock implementation (local or socket-backed) satisfies: translate a
/// local timestamp into the shared reference clock's frame.
///
/// Listener-registering methods take `Box<dyn Fn>` rather than a generic type parameter so the
/// trait stays object-safe — [`crate::object::TimingObject`] and [`crate::provider`] hold
/// clocks behind `Box<dyn SyncClock>`. Only the methods an implementation must actually supply
/// live here; derived behavior lives on [`SyncClockExt`], so [`MockSyncClock`] below only has
/// to fake the required surface.
pub trait SyncClock: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Current estimated offset, reference minus local, in milliseconds.
    fn skew(&self) -> i64;

    /// The uniform future-dating offset advertised by the server, in milliseconds.
    fn delta(&self) -> i64;

    /// Idempotent; terminal.
    fn close(&self);

    fn on_change(&self, listener: Box<dyn Fn(SkewChange) + Send + Sync>) -> ListenerId;
    fn off_change(&self, id: ListenerId);

    fn on_ready_state_change(&self, listener: Box<dyn Fn(ReadyState) + Send + Sync>)
        -> ListenerId;
    fn off_ready_state_change(&self, id: ListenerId);
}

/// Hand-written stand-in for `#[mockall::automock]`: mockall's macro panics on this trait
/// because `on_change`/`on_ready_state_change` take `Box<dyn Fn(..)>` arguments, which its
/// code generation doesn't support (see https://github.com/asomers/mockall/issues/139).
/// Each `expect_*` method stores a closure that backs the corresponding [`SyncClock`] method.
#[cfg(test)]
pub struct MockSyncClock {
    ready_state: std::sync::Mutex<Option<Box<dyn Fn() -> ReadyState + Send>>>,
    skew: std::sync::Mutex<Option<Box<dyn Fn() -> i64 + Send>>>,
    delta: std::sync::Mutex<Option<Box<dyn Fn() -> i64 + Send>>>,
    close: std::sync::Mutex<Option<Box<dyn Fn() + Send>>>,
    on_change: std::sync::Mutex<
        Option<Box<dyn Fn(Box<dyn Fn(SkewChange) + Send + Sync>) -> ListenerId + Send>>,
    >,
    off_change: std::sync::Mutex<Option<Box<dyn Fn(ListenerId) + Send>>>,
    on_ready_state_change: std::sync::Mutex<
        Option<Box<dyn Fn(Box<dyn Fn(ReadyState) + Send + Sync>) -> ListenerId + Send>>,
    >,
    off_ready_state_change: std::sync::Mutex<Option<Box<dyn Fn(ListenerId) + Send>>>,
}

#[cfg(test)]
pub struct MockReturningSetter0<'a, Ret>(&'a std::sync::Mutex<Option<Box<dyn Fn() -> Ret + Send>>>);

#[cfg(test)]
impl<'a, Ret> MockReturningSetter0<'a, Ret> {
    pub fn returning<G: Fn() -> Ret + Send + 'static>(self, f: G) {
        *self.0.lock().unwrap() = Some(Box::new(f));
    }
}

#[cfg(test)]
pub struct MockReturningSetter1<'a, Arg, Ret>(
    &'a std::sync::Mutex<Option<Box<dyn Fn(Arg) -> Ret + Send>>>,
);

#[cfg(test)]
impl<'a, Arg, Ret> MockReturningSetter1<'a, Arg, Ret> {
    pub fn returning<G: Fn(Arg) -> Ret + Send + 'static>(self, f: G) {
        *self.0.lock().unwrap() = Some(Box::new(f));
    }
}

#[cfg(test)]
impl MockSyncClock {
    pub fn new() -> Self {
        Self {
            ready_state: std::sync::Mutex::new(None),
            skew: std::sync::Mutex::new(None),
            delta: std::sync::Mutex::new(None),
            close: std::sync::Mutex::new(None),
            on_change: std::sync::Mutex::new(None),
            off_change: std::sync::Mutex::new(None),
            on_ready_state_change: std::sync::Mutex::new(None),
            off_ready_state_change: std::sync::Mutex::new(None),
        }
    }

    pub fn expect_ready_state(&mut self) -> MockReturningSetter0<'_, ReadyState> {
        MockReturningSetter0(&self.ready_state)
    }

    pub fn expect_skew(&mut self) -> MockReturningSetter0<'_, i64> {
        MockReturningSetter0(&self.skew)
    }

    pub fn expect_delta(&mut self) -> MockReturningSetter0<'_, i64> {
        MockReturningSetter0(&self.delta)
    }

    pub fn expect_close(&mut self) -> MockReturningSetter0<'_, ()> {
        MockReturningSetter0(&self.close)
    }

    pub fn expect_on_change(
        &mut self,
    ) -> MockReturningSetter1<'_, Box<dyn Fn(SkewChange) + Send + Sync>, ListenerId> {
        MockReturningSetter1(&self.on_change)
    }

    pub fn expect_off_change(&mut self) -> MockReturningSetter1<'_, ListenerId, ()> {
        MockReturningSetter1(&self.off_change)
    }

    pub fn expect_on_ready_state_change(
        &mut self,
    ) -> MockReturningSetter1<'_, Box<dyn Fn(ReadyState) + Send + Sync>, ListenerId> {
        MockReturningSetter1(&self.on_ready_state_change)
    }

    pub fn expect_off_ready_state_change(&mut self) -> MockReturningSetter1<'_, ListenerId, ()> {
        MockReturningSetter1(&self.off_ready_state_change)
    }
}

#[cfg(test)]
impl SyncClock for MockSyncClock {
    fn ready_state(&self) -> ReadyState {
        (self.ready_state.lock().unwrap().as_ref().expect("expect_ready_state not set"))()
    }

    fn skew(&self) -> i64 {
        (self.skew.lock().unwrap().as_ref().expect("expect_skew not set"))()
    }

    fn delta(&self) -> i64 {
        (self.delta.lock().unwrap().as_ref().expect("expect_delta not set"))()
    }

    fn close(&self) {
        (self.close.lock().unwrap().as_ref().expect("expect_close not set"))()
    }

    fn on_change(&self, listener: Box<dyn Fn(SkewChange) + Send + Sync>) -> ListenerId {
        (self.on_change.lock().unwrap().as_ref().expect("expect_on_change not set"))(listener)
    }

    fn off_change(&self, id: ListenerId) {
        (self.off_change.lock().unwrap().as_ref().expect("expect_off_change not set"))(id)
    }

    fn on_ready_state_change(
        &self,
        listener: Box<dyn Fn(ReadyState) + Send + Sync>,
    ) -> ListenerId {
        (self
            .on_ready_state_change
            .lock()
            .unwrap()
            .as_ref()
            .expect("expect_on_ready_state_change not set"))(listener)
    }

    fn off_ready_state_change(&self, id: ListenerId) {
        (self
            .off_ready_state_change
            .lock()
            .unwrap()
            .as_ref()
            .expect("expect_off_ready_state_change not set"))(id)
    }
}

/// Derived [`SyncClock`] behavior, blanket-implemented so every implementation (and
/// `Box<dyn SyncClock>`) gets it for free without `automock` having to fake it too.
pub trait SyncClockExt: SyncClock {
    /// Map a local timestamp (ms since epoch) into the reference clock's frame.
    fn get_time(&self, local_ms: i64) -> i64 {
        local_ms + self.skew() - self.delta()
    }

    /// [`SyncClockExt::get_time`] applied to "now": `clock.now() == clock.get_time(local_now_ms())`.
    fn now(&self) -> i64 {
        self.get_time(local_now_ms())
    }
}

impl<T: SyncClock + ?Sized> SyncClockExt for T {}
