//! Unix socket server for the daemon.
//!
//! Handles client connections and routes requests to the style backend.

use crate::backend::{create_backend, dispatch, StyleBackend};
use crate::config::Config;
use crate::protocol::{framing, Message, Response};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

/// The daemon server that listens for client connections.
pub struct DaemonServer {
    socket_path: PathBuf,
    backend: Arc<dyn StyleBackend>,
}

/// What the connection handler wants the accept loop to do next.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Continue,
    Shutdown,
}

impl DaemonServer {
    /// Create a new daemon server.
    pub fn new(config: Config) -> Result<Self> {
        let socket_path = Config::socket_path()?;
        let backend = create_backend(&config)?;

        Ok(Self {
            socket_path,
            backend,
        })
    }

    /// Run the daemon server.
    pub async fn run(&self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // Remove existing socket file
        if self.socket_path.exists() {
            tokio::fs::remove_file(&self.socket_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to remove existing socket: {}",
                        self.socket_path.display()
                    )
                })?;
        }

        info!("Checking backend health...");
        self.backend
            .health_check()
            .await
            .with_context(|| format!("Backend health check failed for {}", self.backend.name()))?;
        info!("Backend ready: {}", self.backend.name());

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", self.socket_path.display()))?;

        info!("Daemon listening on {}", self.socket_path.display());

        self.write_pid_file().await?;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let backend = Arc::clone(&self.backend);
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            match handle_client(stream, backend).await {
                                Ok(Next::Shutdown) => {
                                    let _ = shutdown_tx.send(()).await;
                                }
                                Ok(Next::Continue) => {}
                                Err(e) => error!("Error handling client: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown request");
                    break;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Write the PID file.
    async fn write_pid_file(&self) -> Result<()> {
        let pid_path = Config::pid_path()?;
        if let Some(parent) = pid_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pid = std::process::id();
        tokio::fs::write(&pid_path, pid.to_string()).await?;
        info!("PID file written to {}", pid_path.display());
        Ok(())
    }

    async fn cleanup(&self) {
        let _ = tokio::fs::remove_file(&self.socket_path).await;
        if let Ok(pid_path) = Config::pid_path() {
            let _ = tokio::fs::remove_file(&pid_path).await;
        }
    }
}

/// Handle a single client connection.
async fn handle_client<S>(mut stream: S, backend: Arc<dyn StyleBackend>) -> Result<Next>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Client connected");

    let message: Message = framing::read_message(&mut stream).await?;

    let (response, next) = match message {
        Message::Request(request) => {
            debug!(
                "Received {} request for user '{}'",
                request.subcommand(),
                request.user_id()
            );
            let response = match dispatch(backend.as_ref(), &request).await {
                Ok(reply) => Response::success(reply),
                Err(e) => {
                    error!("{} failed: {}", request.subcommand(), e);
                    Response::from_error(&e)
                }
            };
            (response, Next::Continue)
        }
        Message::Status => (
            Response::success(crate::protocol::Reply::text(format!(
                "Backend: {}",
                backend.name()
            ))),
            Next::Continue,
        ),
        Message::Shutdown => (
            Response::success(crate::protocol::Reply::text("shutting down")),
            Next::Shutdown,
        ),
    };

    framing::write_message(&mut stream, &response).await?;
    debug!("Response sent");

    Ok(next)
}

/// Check if the daemon is running.
pub async fn is_daemon_running() -> bool {
    if let Ok(socket_path) = Config::socket_path() {
        if socket_path.exists() {
            // Try to connect
            if let Ok(mut stream) = UnixStream::connect(&socket_path).await {
                // Send a status request
                if framing::write_message(&mut stream, &Message::Status)
                    .await
                    .is_ok()
                {
                    if let Ok(_response) = framing::read_message::<_, Response>(&mut stream).await {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Stop the running daemon.
pub async fn stop_daemon() -> Result<()> {
    let socket_path = Config::socket_path()?;
    if !socket_path.exists() {
        return Err(anyhow::anyhow!("Daemon is not running"));
    }

    let mut stream = UnixStream::connect(&socket_path)
        .await
        .context("Failed to connect to daemon")?;

    framing::write_message(&mut stream, &Message::Shutdown).await?;
    let _: Response = framing::read_message(&mut stream).await?;
    info!("Shutdown request sent");

    Ok(())
}

/// Get the daemon's PID if running.
pub async fn get_daemon_pid() -> Option<u32> {
    if let Ok(pid_path) = Config::pid_path() {
        if let Ok(contents) = tokio::fs::read_to_string(&pid_path).await {
            return contents.trim().parse().ok();
        }
    }
    None
}
