//! Core primitives for the online timing resource: the state-vector motion model, the
//! `Interval` clamp used to keep a position within a configured range, a small typed event bus,
//! the shared lifecycle enum, and the JSON wire protocol spoken between client and server.
//!
//! This crate has no knowledge of transports, clocks, or the protocol state machine built on
//! top of it (see the `timing-client` and `timing-server` crates) — it is the algebra and data
//! model the rest of the system shares.

pub mod error;
pub mod event;
pub mod interval;
pub mod protocol;
pub mod ready_state;
pub mod vector;

pub use error::TimingError;
pub use event::{EventBus, ListenerId};
pub use interval::Interval;
pub use ready_state::ReadyState;
pub use vector::{Direction, StateVector, EPSILON};
