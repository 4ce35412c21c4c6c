//! The contract shared by every timing-object provider: a vector, a readyState, an
//! optional range, and an update/change/close surface.

mod local;
mod socket;

pub use local::LocalTimingProvider;
pub use socket::SocketTimingProvider;

use std::future::Future;
use std::pin::Pin;

use timing_core::{Interval, ListenerId, ReadyState, StateVector, TimingError};

/// A boxed, `Send` future, used so [`TimingProvider::update`] can be called through
/// `Box<dyn TimingProvider>` without an `async-trait`-style macro.
pub type TimingFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Fields the caller wants to change; a `None` field means "keep the current extrapolated
/// value".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateRequest {
    pub position: Option<f64>,
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
}

/// A timing provider: the thing a [`crate::object::TimingObject`] delegates to. Implemented by
/// [`LocalTimingProvider`] (wall-clock-driven) and [`SocketTimingProvider`] (server-backed).
///
/// Listener-registering methods take `Box<dyn Fn>` rather than a generic type parameter so the
/// trait stays object-safe.
pub trait TimingProvider: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// The provider's current, un-extrapolated vector.
    fn vector(&self) -> StateVector;

    fn range(&self) -> Option<Interval>;

    /// Extrapolate [`TimingProvider::vector`] to "now" in the local clock frame.
    fn query(&self) -> StateVector;

    /// Request a change. Resolves with `()` once best-effort delivery is complete — the
    /// authoritative effect is the subsequent `change` event, not this future's value.
    fn update(&self, request: UpdateRequest) -> TimingFuture<Result<(), TimingError>>;

    /// Idempotent; terminal.
    fn close(&self);

    fn on_change(&self, listener: Box<dyn Fn(StateVector) + Send + Sync>) -> ListenerId;
    fn off_change(&self, id: ListenerId);

    fn on_ready_state_change(&self, listener: Box<dyn Fn(ReadyState) + Send + Sync>)
        -> ListenerId;
    fn off_ready_state_change(&self, id: ListenerId);
}
