//! Socket provider for the daemon.
//!
//! [`ManualSocketProvider`] binds a Unix socket at a path, by default the one
//! returned by [`default_socket_path`]. It implements the [`SocketProvider`]
//! trait from `passwd-cache-core`.
//!
//! [`SocketProvider`]: passwd_cache_core::SocketProvider

mod manual;

pub use manual::ManualSocketProvider;
pub use passwd_cache_core::default_socket_path;
