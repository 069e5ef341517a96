//! Trait definitions for pluggable components.
//!
//! These traits define the interfaces for:
//! - Credential and retry dialogs (UI layer)
//! - The persistent secret store ("wallet")
//! - Socket provisioning
//! - Window lifecycle notifications
//!
//! The server only ever talks to these traits, so it can be tested with mock
//! implementations and different backends can be swapped in.

use std::future::Future;
use std::pin::Pin;

use secrecy::{ExposeSecret, SecretString};
use tokio::net::UnixListener;

use crate::protocol::ProtocolError;
use crate::types::{PromptConfig, PromptResponse, RetryConfig, WindowId};

/// Error type for dialog operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PromptError {
    /// User cancelled the dialog.
    #[error("prompt cancelled by user")]
    Cancelled,

    /// Dialog timed out.
    #[error("prompt timed out after {0} seconds")]
    Timeout(u64),

    /// Failed to initialize the UI backend.
    #[error("UI initialization failed: {0}")]
    InitializationFailed(String),

    /// Generic UI error.
    #[error("UI error: {0}")]
    UiError(String),
}

/// Error type for secret store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store is closed, locked or disabled.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// Reading or writing an entry failed.
    #[error("secret store I/O failed: {0}")]
    Io(String),
}

/// Error type for socket provider operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Failed to bind to the socket.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Socket path is invalid.
    #[error("invalid socket path: {0}")]
    InvalidPath(String),

    /// Failed to create the socket directory.
    #[error("failed to create socket directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
}

/// A login kept in the secret store.
#[derive(Clone)]
pub struct StoredLogin {
    pub username: String,
    pub password: SecretString,
}

impl StoredLogin {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl std::fmt::Debug for StoredLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredLogin")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// All logins stored in one secret store slot, in storage order.
#[derive(Debug, Clone, Default)]
pub struct StoredLogins(pub Vec<StoredLogin>);

impl StoredLogins {
    /// Check if the slot holds no login.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Known usernames, in storage order.
    pub fn usernames(&self) -> Vec<String> {
        self.0.iter().map(|l| l.username.clone()).collect()
    }

    /// Pick the login for a query.
    ///
    /// The login whose username equals `username` wins. Without a username,
    /// the first login is picked unless the username is read-only.
    pub fn select(&self, username: &str, read_only: bool) -> Option<&StoredLogin> {
        if username.is_empty() {
            if read_only {
                return None;
            }
            return self.0.first();
        }
        self.0.iter().find(|l| l.username == username)
    }

    /// Insert `login`, replacing a login with the same username.
    pub fn upsert(&mut self, login: StoredLogin) {
        match self.0.iter_mut().find(|l| l.username == login.username) {
            Some(existing) => existing.password = login.password,
            None => self.0.push(login),
        }
    }

    /// Whether a login with this username and password is stored.
    pub fn contains(&self, username: &str, password: &str) -> bool {
        self.0
            .iter()
            .any(|l| l.username == username && l.password.expose_secret() == password)
    }
}

/// Trait for dialog implementations.
///
/// This trait abstracts the UI layer, allowing different implementations:
/// - A desktop dialog
/// - CLI (rpassword) for headless systems
/// - Mock for testing
///
/// # Example (Mock Implementation)
///
/// ```ignore
/// struct AlwaysCancel;
///
/// impl InteractionController for AlwaysCancel {
///     fn prompt_credentials(&self, _config: PromptConfig) -> ... {
///         Box::pin(async { Err(PromptError::Cancelled) })
///     }
///     fn prompt_retry(&self, _config: RetryConfig) -> ... {
///         Box::pin(async { Ok(false) })
///     }
/// }
/// ```
pub trait InteractionController: Send + Sync {
    /// Show the credential dialog.
    ///
    /// # Errors
    ///
    /// Returns `PromptError::Cancelled` if the user rejects the dialog. Any
    /// error is treated as a rejection by the server.
    fn prompt_credentials(
        &self,
        config: PromptConfig,
    ) -> Pin<Box<dyn Future<Output = Result<PromptResponse, PromptError>> + Send + '_>>;

    /// Ask whether to retry after a rejected credential.
    ///
    /// Returns `Ok(true)` to retry. Errors count as "no".
    fn prompt_retry(
        &self,
        config: RetryConfig,
    ) -> Pin<Box<dyn Future<Output = Result<bool, PromptError>> + Send + '_>>;
}

/// Trait for the persistent secret store.
///
/// Slots are addressed by wallet key (see [`crate::cache_key::wallet_key`]);
/// each slot holds any number of logins.
pub trait SecretStore: Send + Sync {
    /// Read every login stored in a slot. A missing slot is an empty result.
    fn read(
        &self,
        wallet_key: String,
    ) -> Pin<Box<dyn Future<Output = Result<StoredLogins, StoreError>> + Send + '_>>;

    /// Store a login, replacing the login with the same username.
    fn write(
        &self,
        wallet_key: String,
        login: StoredLogin,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Trait for socket provider implementations.
pub trait SocketProvider: Send + Sync {
    /// Create and return a Unix socket listener.
    fn listen(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UnixListener, SocketError>> + Send + '_>>;

    /// Return the socket path (for logging/debugging).
    fn socket_path(&self) -> Option<&std::path::Path> {
        None
    }
}

/// Window lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The window with this id was closed.
    Closed(WindowId),
}

impl std::fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowEvent::Closed(id) => write!(f, "window_closed({})", id),
        }
    }
}

/// Trait for window lifecycle monitoring.
pub trait WindowMonitor: Send + Sync {
    /// Wait for and return the next window event.
    ///
    /// Returns `None` if the event source is closed or unavailable.
    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = Option<WindowEvent>> + Send + '_>>;
}

/// A window monitor that never produces events.
pub struct NoOpWindowMonitor;

impl WindowMonitor for NoOpWindowMonitor {
    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = Option<WindowEvent>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

/// A window monitor fed from a channel.
///
/// Whoever holds the sender reports closed windows.
pub struct ChannelWindowMonitor {
    rx: tokio::sync::mpsc::UnboundedReceiver<WindowEvent>,
}

impl ChannelWindowMonitor {
    pub fn new() -> (tokio::sync::mpsc::UnboundedSender<WindowEvent>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl WindowMonitor for ChannelWindowMonitor {
    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = Option<WindowEvent>> + Send + '_>> {
        Box::pin(self.rx.recv())
    }
}

// Helper trait for parsing protocol messages
impl crate::protocol::Request {
    /// Parse a request from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(ProtocolError::Serialization)
    }

    /// Serialize the request to a JSON string with newline.
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

impl crate::protocol::Response {
    /// Parse a response from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(ProtocolError::Serialization)
    }

    /// Serialize the response to a JSON string with newline.
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}
