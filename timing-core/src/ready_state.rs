//! The lifecycle shared by every [`crate`]-level socket-backed or local component: a sync
//! clock, a timing provider, or the server's view of a connection.

use std::fmt;

/// Connection/provider lifecycle. Transitions are one-directional:
/// `Connecting -> Open -> Closing -> Closed`, with `Closed` terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ReadyState::Closed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ReadyState::Open)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
