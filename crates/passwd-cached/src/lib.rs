//! Credential cache daemon.
//!
//! This crate provides the daemon process of passwd-cache: the credential
//! server that arbitrates checks and queries, the interaction backends that
//! show dialogs, and the socket front end.
//!
//! The server can also be embedded directly:
//!
//! ```
//! use std::sync::Arc;
//! use passwd_cached::prompt::MockInteraction;
//! use passwd_cached::server::{PasswdServer, ServerSettings};
//! use passwd_cache_core::AuthInfo;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mock = Arc::new(MockInteraction::with_login("toto", "foobar"));
//! let (server, _task) = PasswdServer::spawn(mock, None, ServerSettings::default());
//!
//! let result = server
//!     .query_auth_info(AuthInfo::new("http://www.example.com"), "", 0, 0)
//!     .await
//!     .unwrap();
//! assert!(result.is_modified());
//! # }
//! ```

pub mod daemon;
pub mod prompt;
pub mod server;
pub mod socket;
pub mod store;

// Re-export main components
pub use daemon::Daemon;
pub use server::{PasswdServer, PendingReply, ServerError, ServerSettings};
pub use socket::ManualSocketProvider;
pub use store::MemorySecretStore;
