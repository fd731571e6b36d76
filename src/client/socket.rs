//! Unix socket client for communicating with the daemon.

use crate::config::Config;
use crate::protocol::{framing, Message, Reply, Request, Response};
use anyhow::{Context as AnyhowContext, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

/// Send a request to the daemon and return the backend's reply.
///
/// `reply_timeout` bounds the wait for the answer; `None` waits as long as
/// the backend takes.
pub async fn send_request(request: Request, reply_timeout: Option<Duration>) -> Result<Reply> {
    let socket_path = Config::socket_path()?;

    // Connect with timeout
    let stream = tokio::time::timeout(
        Duration::from_secs(5),
        UnixStream::connect(&socket_path),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Connection timeout - is the daemon running?"))?
    .with_context(|| {
        format!(
            "Failed to connect to daemon at {}. Start it with: stylemail daemon start",
            socket_path.display()
        )
    })?;

    send_request_to_stream(stream, request, reply_timeout).await
}

/// Send a request to an existing stream.
async fn send_request_to_stream<S>(
    mut stream: S,
    request: Request,
    reply_timeout: Option<Duration>,
) -> Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framing::write_message(&mut stream, &Message::Request(request)).await?;

    let response: Response = match reply_timeout {
        Some(limit) => tokio::time::timeout(limit, framing::read_message(&mut stream))
            .await
            .map_err(|_| anyhow::anyhow!("Request timeout - backend took too long"))??,
        None => framing::read_message(&mut stream).await?,
    };

    Ok(response.into_result()?)
}
