//! Protocol types for client-daemon communication.
//!
//! The passwd-cache protocol uses JSON over Unix sockets with newline-delimited
//! messages, one request and one response per connection. This module defines
//! the request and response types for the protocol.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheEntry;
use crate::types::{AuthInfo, ExpirePolicy, RequestId, SeqNr, WindowId};

/// Generate an 8-character short ID for a cache entry.
///
/// The ID is deterministic: the same key and realm always produce the same
/// short ID.
///
/// # Example
///
/// ```
/// use passwd_cache_core::protocol::short_id;
///
/// let id = short_id("http-www.example.com", "WallyWorld");
/// assert_eq!(id.len(), 8);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn short_id(cache_key: &str, realm: &str) -> String {
    let mut hasher = DefaultHasher::new();
    cache_key.hash(&mut hasher);
    realm.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// Metadata about a cached credential (no secrets exposed).
///
/// Used by the `ListCache` command to show what's in the cache
/// without revealing passwords.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntryInfo {
    /// Short 8-character hex ID for easy reference in CLI.
    pub id: String,

    /// The cache key the entry is filed under.
    pub cache_key: String,

    /// The URL the credential was stored for.
    pub url: String,

    /// Authentication realm.
    pub realm: String,

    /// Stored username.
    pub username: String,

    /// Lifetime policy.
    pub expire: ExpirePolicy,

    /// Windows the entry is bound to.
    pub windows: Vec<WindowId>,

    /// Seconds until a time-limited entry expires.
    pub ttl_remaining_secs: Option<u64>,

    /// Sequence number at the time the entry was written.
    pub seq_nr: SeqNr,

    /// The dialog for this entry was declined.
    pub canceled: bool,
}

impl CacheEntryInfo {
    /// Describe a cache entry.
    pub fn from_entry(cache_key: &str, entry: &CacheEntry) -> Self {
        Self {
            id: short_id(cache_key, &entry.info.realm),
            cache_key: cache_key.to_string(),
            url: entry.info.url.clone(),
            realm: entry.info.realm.clone(),
            username: entry.info.username.clone(),
            expire: entry.expire,
            windows: entry.windows.clone(),
            ttl_remaining_secs: entry.time_remaining().map(|d| d.as_secs()),
            seq_nr: entry.seq_nr,
            canceled: entry.canceled,
        }
    }
}

/// A request from the client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Look up a credential in the cache. Never prompts.
    CheckAuthInfo {
        info: AuthInfo,
        #[serde(default)]
        window_id: WindowId,
    },

    /// Obtain a credential, prompting the user if needed.
    QueryAuthInfo {
        info: AuthInfo,

        /// Why the previous credential was rejected, if it was.
        #[serde(default)]
        error_message: String,

        #[serde(default)]
        window_id: WindowId,

        /// The server sequence number the caller last saw.
        #[serde(default)]
        seq_nr: SeqNr,
    },

    /// Seed the cache with a credential obtained elsewhere.
    AddAuthInfo {
        info: AuthInfo,
        #[serde(default)]
        window_id: WindowId,
    },

    /// Remove cached credentials for a host.
    RemoveAuthInfo {
        host: String,
        protocol: String,
        /// Only entries for this user; all users when empty.
        #[serde(default)]
        user: String,
    },

    /// Unbind a window from cached credentials.
    RemoveAuthForWindow { window_id: WindowId },

    /// A window was closed: unbind it and cancel its requests.
    WindowClosed { window_id: WindowId },

    /// List all cached credentials (metadata only, no secrets).
    ListCache,

    /// Ping the daemon (health check).
    Ping,
}

/// A response from the daemon to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of a check or query. `info.modified` tells whether the
    /// credential is usable.
    AuthResult {
        request_id: RequestId,
        seq_nr: SeqNr,
        info: AuthInfo,
    },

    /// Confirmation that a credential was added.
    Added,

    /// Confirmation that credentials were removed.
    Removed {
        /// Number of entries removed.
        count: usize,
    },

    /// Confirmation that a window close was processed.
    WindowClosed,

    /// List of cached credentials (metadata only).
    CacheEntries {
        /// Information about each cached credential.
        entries: Vec<CacheEntryInfo>,
    },

    /// Response to a ping request.
    Pong,

    /// An error response.
    Error {
        /// The error code.
        code: ErrorCode,

        /// A human-readable error message.
        message: String,
    },
}

/// Error codes for protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid request format.
    InvalidRequest,

    /// Internal daemon error.
    InternalError,

    /// Daemon is shutting down.
    ShuttingDown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidRequest => write!(f, "invalid_request"),
            ErrorCode::InternalError => write!(f, "internal_error"),
            ErrorCode::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read/write to the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Received an invalid message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,
}

// Custom serialization for SecretString - exposes the secret for IPC
pub(crate) fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use secrecy::ExposeSecret;
    serializer.serialize_str(secret.expose_secret())
}

pub(crate) fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::from(s))
}

impl Response {
    /// Create an auth result response.
    pub fn auth_result(request_id: RequestId, seq_nr: SeqNr, info: AuthInfo) -> Self {
        Response::AuthResult {
            request_id,
            seq_nr,
            info,
        }
    }

    /// Create an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a removed confirmation response.
    pub fn removed(count: usize) -> Self {
        Response::Removed { count }
    }

    /// Create a cache entries response.
    pub fn cache_entries(entries: Vec<CacheEntryInfo>) -> Self {
        Response::CacheEntries { entries }
    }
}
