//! The timing-object server: accepts WebSocket connections, maintains one state vector per
//! named timing object, fans out `change`, and answers `sync`.

pub mod config;
pub mod connection;
pub mod origin;
pub mod registry;

pub use config::Cli;
pub use connection::serve;
pub use origin::{OriginPolicy, PermissiveOriginPolicy};
pub use registry::Registry;
