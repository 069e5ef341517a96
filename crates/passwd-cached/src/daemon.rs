//! Main daemon orchestration.
//!
//! This module provides the `Daemon` struct that coordinates:
//! - Socket listening for client connections
//! - Translating protocol requests into credential server calls
//! - Forwarding window lifecycle events to the server
//!
//! Each connection is served on its own task, so a query waiting for a dialog
//! never holds up other clients.

use passwd_cache_core::{
    ErrorCode, NoOpWindowMonitor, Request, Response, SocketProvider, WindowEvent, WindowMonitor,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};

use crate::server::{PasswdServer, ServerError};

/// The main daemon struct.
pub struct Daemon<S: SocketProvider, M: WindowMonitor> {
    /// Handle to the credential server.
    server: PasswdServer,
    /// The socket provider.
    socket_provider: S,
    /// Source of window close notifications.
    window_monitor: M,
}

impl<S: SocketProvider> Daemon<S, NoOpWindowMonitor> {
    /// Create a new daemon without window monitoring.
    pub fn new(socket_provider: S, server: PasswdServer) -> Self {
        Self::with_window_monitor(socket_provider, server, NoOpWindowMonitor)
    }
}

impl<S: SocketProvider, M: WindowMonitor> Daemon<S, M> {
    /// Create a new daemon with window monitoring.
    pub fn with_window_monitor(socket_provider: S, server: PasswdServer, window_monitor: M) -> Self {
        Self {
            server,
            socket_provider,
            window_monitor,
        }
    }

    /// The credential server this daemon serves.
    pub fn server(&self) -> &PasswdServer {
        &self.server
    }

    /// Run the daemon main loop.
    ///
    /// Listens for connections and window events until the listener fails
    /// to bind. Accept errors are logged and skipped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let listener = self.socket_provider.listen().await?;
        info!(
            path = ?self.socket_provider.socket_path(),
            "Daemon listening for connections"
        );

        let mut monitoring = true;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("Accepted connection");
                        let server = self.server.clone();
                        tokio::spawn(handle_connection(server, stream));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                event = self.window_monitor.next_event(), if monitoring => match event {
                    Some(event) => self.handle_window_event(event).await,
                    None => {
                        warn!("Window monitor stopped, window close events will be missed");
                        monitoring = false;
                    }
                },
            }
        }
    }

    async fn handle_window_event(&self, event: WindowEvent) {
        debug!(event = %event, "Window event");
        match event {
            WindowEvent::Closed(window_id) => {
                if let Err(e) = self.server.window_closed(window_id).await {
                    warn!(window_id, error = %e, "Failed to process closed window");
                }
            }
        }
    }
}

/// Serve one client connection.
///
/// A connection carries any number of newline-delimited requests, answered
/// in order.
async fn handle_connection(server: PasswdServer, stream: UnixStream) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Client disconnected");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to read request");
                return;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        let response = match Request::parse(line.trim()) {
            Ok(request) => handle_request(&server, request).await,
            Err(e) => {
                warn!(error = %e, "Failed to parse request");
                Response::error(ErrorCode::InvalidRequest, e.to_string())
            }
        };

        if let Err(e) = send_response(&mut writer, &response).await {
            error!(error = %e, "Failed to send response");
            return;
        }
    }
}

/// Handle a parsed request.
pub async fn handle_request(server: &PasswdServer, request: Request) -> Response {
    let result = match request {
        Request::CheckAuthInfo { info, window_id } => server
            .check_auth_info(info, window_id)
            .await
            .map(|r| Response::auth_result(r.request_id, r.seq_nr, r.info)),
        Request::QueryAuthInfo {
            info,
            error_message,
            window_id,
            seq_nr,
        } => server
            .query_auth_info(info, &error_message, window_id, seq_nr)
            .await
            .map(|r| Response::auth_result(r.request_id, r.seq_nr, r.info)),
        Request::AddAuthInfo { info, window_id } => server
            .add_auth_info(info, window_id)
            .await
            .map(|()| Response::Added),
        Request::RemoveAuthInfo {
            host,
            protocol,
            user,
        } => {
            let result = server.remove_auth_info(&host, &protocol, &user).await;
            if let Ok(count) = result {
                info!(host = %host, protocol = %protocol, count, "Removed credentials");
            }
            result.map(Response::removed)
        }
        Request::RemoveAuthForWindow { window_id } => server
            .remove_auth_for_window(window_id)
            .await
            .map(Response::removed),
        Request::WindowClosed { window_id } => server
            .window_closed(window_id)
            .await
            .map(|()| Response::WindowClosed),
        Request::ListCache => server.list_entries().await.map(Response::cache_entries),
        Request::Ping => Ok(Response::Pong),
    };

    result.unwrap_or_else(|e| {
        let code = match e {
            ServerError::ShutDown => ErrorCode::ShuttingDown,
            ServerError::InvalidKey(_) => ErrorCode::InvalidRequest,
        };
        debug!(code = %code, error = %e, "Request failed");
        Response::error(code, e.to_string())
    })
}

/// Send a response to the client.
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> anyhow::Result<()> {
    let json = response.to_json_line()?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
