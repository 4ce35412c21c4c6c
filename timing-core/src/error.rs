//! Shared error taxonomy for the timing client and server.
//!
//! Operational failures (bad messages, unknown ids, stale data) are not exceptional on the
//! server: they are logged and dropped so that one misbehaving client cannot affect others.
//! On the client they are surfaced as a rejected [`TimingError`] from the handful of calls that
//! can fail synchronously (chiefly `update()`).

use std::fmt;

/// Errors that can be reported back to a caller of the timing client API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// `update()` was called while the provider's `readyState` was not `open`.
    NotOpen,

    /// The provider (or its underlying channel) is `closed`; any outstanding operation is
    /// abandoned.
    Closed,

    /// A message could not be parsed as the wire protocol.
    Malformed(String),

    /// A message referenced a timing-object id this side does not recognize.
    UnknownId(String),
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingError::NotOpen => write!(f, "timing provider is not open"),
            TimingError::Closed => write!(f, "timing provider is closed"),
            TimingError::Malformed(detail) => write!(f, "malformed message: {detail}"),
            TimingError::UnknownId(id) => write!(f, "unknown timing object id: {id}"),
        }
    }
}

impl std::error::Error for TimingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(TimingError::NotOpen.to_string(), "timing provider is not open");
        assert_eq!(
            TimingError::UnknownId("/clock".into()).to_string(),
            "unknown timing object id: /clock"
        );
    }
}
