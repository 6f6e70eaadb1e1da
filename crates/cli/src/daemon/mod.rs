mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use msb_protocol::{ControlRequest, ControlResponse};
pub use server::{Daemon, handle_request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(windows)]
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

pub const DAEMON_TCP_PORT: u16 = 14723;

/// Returns the daemon socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/msb-daemon.sock` if available (already user-permissioned),
/// otherwise falls back to `/tmp/msb-daemon-{uid}.sock`.
#[cfg(unix)]
pub fn daemon_socket_path() -> PathBuf {
	if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
		return PathBuf::from(xdg_runtime).join("msb-daemon.sock");
	}

	let uid = unsafe { libc::getuid() };
	PathBuf::from(format!("/tmp/msb-daemon-{uid}.sock"))
}

/// Human-readable daemon address, for messages.
pub fn daemon_address() -> PathBuf {
	#[cfg(unix)]
	{
		daemon_socket_path()
	}
	#[cfg(windows)]
	{
		PathBuf::from(format!("127.0.0.1:{DAEMON_TCP_PORT}"))
	}
}

/// Whether a daemon answers on the usual address.
pub async fn is_running() -> bool {
	match connect_daemon().await {
		Ok(_) => true,
		Err(err) if is_not_running(&err) => false,
		Err(err) => {
			debug!(target = "msb.daemon", error = %err, "daemon connection failed");
			false
		}
	}
}

/// Sends one request and waits for its response.
///
/// Returns `Ok(None)` when no daemon is listening.
pub async fn send_request(request: &ControlRequest) -> Result<Option<ControlResponse>> {
	let stream = match connect_daemon().await {
		Ok(stream) => stream,
		Err(err) if is_not_running(&err) => return Ok(None),
		Err(err) => return Err(err).context("Failed to connect to daemon"),
	};
	send_request_stream(stream, request).await.map(Some)
}

#[cfg(unix)]
async fn connect_daemon() -> std::io::Result<UnixStream> {
	UnixStream::connect(daemon_socket_path()).await
}

#[cfg(windows)]
async fn connect_daemon() -> std::io::Result<TcpStream> {
	TcpStream::connect(("127.0.0.1", DAEMON_TCP_PORT)).await
}

fn is_not_running(err: &std::io::Error) -> bool {
	matches!(err.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused)
}

pub(crate) async fn send_request_stream<S>(mut stream: S, request: &ControlRequest) -> Result<ControlResponse>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(request).context("Failed to serialize daemon request")?;
	stream
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing daemon request")?;
	stream.flush().await.context("Failed flushing daemon request")?;

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	let bytes = reader.read_line(&mut line).await.context("Failed reading daemon response")?;
	if bytes == 0 {
		anyhow::bail!("daemon closed the connection without responding");
	}
	let response = serde_json::from_str(&line).context("Failed parsing daemon response")?;
	Ok(response)
}
