//! Manual socket binding provider.
//!
//! Binds the daemon's Unix socket, creating its directory and replacing a
//! stale socket left by a previous run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use passwd_cache_core::{SocketError, SocketProvider};
use tokio::net::UnixListener;
use tracing::debug;

/// Socket provider that binds a Unix socket at a fixed path.
///
/// The socket is only accessible by its owner.
pub struct ManualSocketProvider {
    /// Path to the Unix socket.
    path: PathBuf,
}

impl ManualSocketProvider {
    /// Create a new manual socket provider with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Bind the socket.
    async fn bind(&self) -> Result<UnixListener, SocketError> {
        if self.path.as_os_str().is_empty() {
            return Err(SocketError::InvalidPath("empty socket path".to_string()));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SocketError::DirectoryCreationFailed)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                        .map_err(SocketError::DirectoryCreationFailed)?;
                }
                debug!(path = %parent.display(), "Created socket directory");
            }
        }

        // A previous daemon may have left its socket behind.
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "Failed to remove existing socket: {}",
                    e
                )))
            })?;
            debug!(path = %self.path.display(), "Removed existing socket");
        }

        let listener = UnixListener::bind(&self.path).map_err(SocketError::BindFailed)?;

        // Set permissions to 0600 (owner only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| {
                SocketError::BindFailed(std::io::Error::other(format!(
                    "Failed to set socket permissions: {}",
                    e
                )))
            })?;
        }

        debug!(path = %self.path.display(), "Socket bound successfully");
        Ok(listener)
    }
}

impl Default for ManualSocketProvider {
    fn default() -> Self {
        Self::new(passwd_cache_core::default_socket_path())
    }
}

impl SocketProvider for ManualSocketProvider {
    fn listen(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UnixListener, SocketError>> + Send + '_>> {
        Box::pin(self.bind())
    }

    fn socket_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
