//! Client-side timing provider, clock synchronization and the `TimingObject` façade.
//!
//! This crate has no opinion on how a timing object's *name* maps to a URL beyond what
//! [`channel::connect`] is given directly; resolving a human-facing address is the embedding
//! application's job.

pub mod channel;
pub mod object;
pub mod provider;
pub mod sync;

pub use channel::{connect, ChannelHandle, ClockInbox, ProviderInbox};
pub use object::TimingObject;
pub use provider::{LocalTimingProvider, SocketTimingProvider, TimingProvider, UpdateRequest};
pub use sync::{LocalSyncClock, SocketSyncClock, SyncClock, SyncClockExt, SyncTuning};
