//! Core types and utilities for passwd-cache.
//!
//! This crate provides the building blocks of the passwd-cache credential
//! server. It performs no I/O of its own beyond loading configuration: the
//! request routing, dialogs and transport live in the daemon crate.
//!
//! # Modules
//!
//! - [`types`]: Core data types (`AuthInfo`, `PromptConfig`, `ExpirePolicy`)
//! - [`cache_key`]: Cache key derivation from request URLs
//! - [`cache`]: The credential cache with window- and TTL-scoped expiry
//! - [`protocol`]: IPC protocol types (`Request`, `Response`, `ErrorCode`)
//! - [`traits`]: Pluggable component traits (`InteractionController`,
//!   `SecretStore`, `SocketProvider`, `WindowMonitor`)
//! - [`config`]: TOML configuration
//!
//! # Example
//!
//! ```
//! use passwd_cache_core::protocol::Request;
//! use passwd_cache_core::types::AuthInfo;
//!
//! let request = Request::CheckAuthInfo {
//!     info: AuthInfo::new("http://www.example.com"),
//!     window_id: 0,
//! };
//!
//! let json = serde_json::to_string(&request).unwrap();
//! assert!(json.contains("check_auth_info"));
//! ```

pub mod cache;
pub mod cache_key;
pub mod config;
pub mod protocol;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root for convenience
pub use cache::{CacheEntry, CredentialCache};
pub use cache_key::{create_cache_key, KeyError};
pub use config::{default_socket_path, Config, ConfigError};
pub use protocol::{short_id, CacheEntryInfo, ErrorCode, ProtocolError, Request, Response};
pub use traits::{
    ChannelWindowMonitor, InteractionController, NoOpWindowMonitor, PromptError, SecretStore,
    SocketError, SocketProvider, StoreError, StoredLogin, StoredLogins, WindowEvent,
    WindowMonitor,
};
pub use types::{
    AuthInfo, AuthResult, ExpirePolicy, PromptConfig, PromptResponse, RequestId, RequestKind,
    RetryConfig, SeqNr, WindowId,
};
