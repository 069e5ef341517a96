//! The credential server.
//!
//! [`PasswdServer`] is a cloneable handle to the request router task, which
//! owns the credential cache. Checks and queries are answered through
//! [`PendingReply`], so a caller can fire a request and collect the result
//! later.

mod pending;
mod reactor;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use passwd_cache_core::cache::DEFAULT_GRACE_PERIOD;
use passwd_cache_core::{
    AuthInfo, AuthResult, CacheEntryInfo, Config, InteractionController, KeyError, RequestId,
    SecretStore, SeqNr, WindowId,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use reactor::{Command, Reactor};

/// Errors returned by [`PasswdServer`] operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server task has stopped.
    #[error("server is shutting down")]
    ShutDown,

    /// The request URL cannot be turned into a cache key.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

/// Timing knobs of the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Lifetime of window-less credentials after their last use.
    pub grace_period: Duration,
    /// How often expired credentials are purged.
    pub cleanup_interval: Duration,
    /// Dialogs left open longer than this count as canceled.
    pub dialog_timeout: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            cleanup_interval: Duration::from_secs(60),
            dialog_timeout: None,
        }
    }
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        Self {
            grace_period: config.grace_period(),
            cleanup_interval: config.cleanup_interval(),
            dialog_timeout: config.dialog_timeout(),
        }
    }
}

/// Handle to a running credential server.
#[derive(Clone)]
pub struct PasswdServer {
    commands: mpsc::UnboundedSender<Command>,
    next_request_id: Arc<AtomicI64>,
}

impl PasswdServer {
    /// Start the request router on the current runtime.
    ///
    /// The task runs until every handle is dropped. Requests still waiting at
    /// that point resolve to [`ServerError::ShutDown`].
    pub fn spawn(
        interaction: Arc<dyn InteractionController>,
        store: Option<Arc<dyn SecretStore>>,
        settings: ServerSettings,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            grace_period_secs = settings.grace_period.as_secs(),
            dialog_timeout_secs = settings.dialog_timeout.map(|d| d.as_secs()),
            secret_store = store.is_some(),
            "Starting credential server"
        );
        let reactor = Reactor::new(rx, tx.downgrade(), interaction, store, &settings);
        let handle = tokio::spawn(reactor.run());
        (
            Self {
                commands: tx,
                next_request_id: Arc::new(AtomicI64::new(0)),
            },
            handle,
        )
    }

    fn send(&self, command: Command) -> Result<(), ServerError> {
        self.commands.send(command).map_err(|_| ServerError::ShutDown)
    }

    fn allocate_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Ask for a cached credential without ever showing a dialog.
    ///
    /// Returns immediately; the reply arrives once any query in flight for
    /// the same resource has resolved.
    pub fn check_auth_info_async(
        &self,
        info: AuthInfo,
        window_id: WindowId,
    ) -> Result<PendingReply, ServerError> {
        let request_id = self.allocate_request_id();
        let (reply, rx) = oneshot::channel();
        self.send(Command::CheckAuthInfo {
            id: request_id,
            info,
            window_id,
            reply,
        })?;
        Ok(PendingReply { request_id, rx })
    }

    /// Ask for a credential, showing a dialog if needed.
    ///
    /// `error_message` describes why the previous attempt failed; the marker
    /// `"<NoAuthPrompt>"` forbids any dialog. `seq_nr` is the sequence number
    /// of the credential the caller last used.
    pub fn query_auth_info_async(
        &self,
        info: AuthInfo,
        error_message: &str,
        window_id: WindowId,
        seq_nr: SeqNr,
    ) -> Result<PendingReply, ServerError> {
        let request_id = self.allocate_request_id();
        let (reply, rx) = oneshot::channel();
        self.send(Command::QueryAuthInfo {
            id: request_id,
            info,
            error_message: error_message.to_string(),
            window_id,
            seq_nr,
            reply,
        })?;
        Ok(PendingReply { request_id, rx })
    }

    pub async fn check_auth_info(
        &self,
        info: AuthInfo,
        window_id: WindowId,
    ) -> Result<AuthResult, ServerError> {
        self.check_auth_info_async(info, window_id)?.wait().await
    }

    pub async fn query_auth_info(
        &self,
        info: AuthInfo,
        error_message: &str,
        window_id: WindowId,
        seq_nr: SeqNr,
    ) -> Result<AuthResult, ServerError> {
        self.query_auth_info_async(info, error_message, window_id, seq_nr)?
            .wait()
            .await
    }

    /// Store a credential the caller obtained on its own.
    pub async fn add_auth_info(&self, info: AuthInfo, window_id: WindowId) -> Result<(), ServerError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::AddAuthInfo {
            info,
            window_id,
            done,
        })?;
        rx.await.map_err(|_| ServerError::ShutDown)?
    }

    /// Remove every credential for `host` and `protocol`, optionally only
    /// those of `user`. Returns the number removed.
    pub async fn remove_auth_info(
        &self,
        host: &str,
        protocol: &str,
        user: &str,
    ) -> Result<usize, ServerError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::RemoveAuthInfo {
            host: host.to_string(),
            protocol: protocol.to_string(),
            user: user.to_string(),
            done,
        })?;
        rx.await.map_err(|_| ServerError::ShutDown)
    }

    /// Drop the window-scoped credentials bound to `window_id`.
    pub async fn remove_auth_for_window(&self, window_id: WindowId) -> Result<usize, ServerError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::RemoveAuthForWindow { window_id, done })?;
        rx.await.map_err(|_| ServerError::ShutDown)
    }

    /// Forget a closed window: its credentials, queued requests and dialogs.
    pub async fn window_closed(&self, window_id: WindowId) -> Result<(), ServerError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::WindowClosed { window_id, done })?;
        rx.await.map_err(|_| ServerError::ShutDown)
    }

    /// Snapshot of the cache, without passwords.
    pub async fn list_entries(&self) -> Result<Vec<CacheEntryInfo>, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListEntries { reply })?;
        rx.await.map_err(|_| ServerError::ShutDown)
    }
}

/// A check or query that has been accepted but maybe not answered yet.
#[derive(Debug)]
pub struct PendingReply {
    request_id: RequestId,
    rx: oneshot::Receiver<AuthResult>,
}

impl PendingReply {
    /// The id the result will carry.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub async fn wait(self) -> Result<AuthResult, ServerError> {
        self.rx.await.map_err(|_| ServerError::ShutDown)
    }

    /// Take the result if it has arrived.
    pub fn try_take(&mut self) -> Option<Result<AuthResult, ServerError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(Ok(result)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ServerError::ShutDown)),
        }
    }
}
