use std::sync::Arc;

use anyhow::{Context, Result};
use msb::DeviceSessionBroker;
use msb_protocol::{ControlRequest, ControlResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(windows)]
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(windows)]
use super::DAEMON_TCP_PORT;
#[cfg(unix)]
use super::daemon_socket_path;

pub struct Daemon {
	broker: Arc<DeviceSessionBroker>,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
	#[cfg(unix)]
	listener: UnixListener,
	#[cfg(unix)]
	socket_path: std::path::PathBuf,
	#[cfg(windows)]
	listener: TcpListener,
}

impl Daemon {
	pub async fn bind(broker: Arc<DeviceSessionBroker>) -> Result<Self> {
		#[cfg(unix)]
		{
			Self::bind_at(broker, daemon_socket_path())
		}

		#[cfg(windows)]
		{
			let addr = format!("127.0.0.1:{}", DAEMON_TCP_PORT);
			let listener = TcpListener::bind(&addr)
				.await
				.with_context(|| format!("Failed to bind daemon TCP socket: {addr}"))?;
			info!(target = "msb.daemon", addr, "daemon listening");
			let (shutdown_tx, shutdown_rx) = watch::channel(false);
			Ok(Self {
				broker,
				shutdown_tx,
				shutdown_rx,
				listener,
			})
		}
	}

	/// Binds a Unix socket at `socket_path`, replacing a stale socket file.
	#[cfg(unix)]
	pub fn bind_at(broker: Arc<DeviceSessionBroker>, socket_path: std::path::PathBuf) -> Result<Self> {
		if socket_path.exists() {
			std::fs::remove_file(&socket_path).with_context(|| format!("Failed to remove existing socket: {}", socket_path.display()))?;
		}
		// XDG_RUNTIME_DIR may point at a directory that does not exist yet
		if let Some(parent) = socket_path.parent() {
			if !parent.exists() {
				std::fs::create_dir_all(parent).with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
			}
		}
		let listener = UnixListener::bind(&socket_path).with_context(|| format!("Failed to bind daemon socket: {}", socket_path.display()))?;
		info!(target = "msb.daemon", socket = %socket_path.display(), "daemon listening");

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Ok(Self {
			broker,
			shutdown_tx,
			shutdown_rx,
			listener,
			socket_path,
		})
	}

	/// Serves clients until a shutdown request or signal, then cleans up
	/// every session and server before returning.
	pub async fn run(mut self) -> Result<()> {
		#[cfg(unix)]
		let result = run_unix(&self.listener, &self.broker, &self.shutdown_tx, &mut self.shutdown_rx).await;

		#[cfg(windows)]
		let result = run_tcp(&self.listener, &self.broker, &self.shutdown_tx, &mut self.shutdown_rx).await;

		let report = self.broker.cleanup().await;
		info!(
			target = "msb.daemon",
			sessions_closed = report.sessions_closed,
			servers_stopped = report.servers_stopped,
			failures = report.failures.len(),
			"daemon stopped"
		);

		#[cfg(unix)]
		if let Err(e) = std::fs::remove_file(&self.socket_path) {
			debug!(target = "msb.daemon", error = %e, "socket file not removed");
		}

		result
	}
}

#[cfg(unix)]
async fn run_unix(
	listener: &UnixListener,
	broker: &Arc<DeviceSessionBroker>,
	shutdown_tx: &watch::Sender<bool>,
	shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	loop {
		tokio::select! {
			_ = shutdown_rx.changed() => {
				if *shutdown_rx.borrow() {
					info!(target = "msb.daemon", "shutdown requested via message");
					break;
				}
			}
			_ = sigterm.recv() => {
				info!(target = "msb.daemon", "received SIGTERM, shutting down");
				break;
			}
			_ = sigint.recv() => {
				info!(target = "msb.daemon", "received SIGINT, shutting down");
				break;
			}
			accept = listener.accept() => {
				let (stream, _) = accept.context("Daemon accept failed")?;
				spawn_client(stream, broker, shutdown_tx);
			}
		}
	}

	Ok(())
}

#[cfg(windows)]
async fn run_tcp(
	listener: &TcpListener,
	broker: &Arc<DeviceSessionBroker>,
	shutdown_tx: &watch::Sender<bool>,
	shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
	loop {
		tokio::select! {
			_ = shutdown_rx.changed() => {
				if *shutdown_rx.borrow() {
					info!(target = "msb.daemon", "shutdown requested via message");
					break;
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!(target = "msb.daemon", "received Ctrl+C, shutting down");
				break;
			}
			accept = listener.accept() => {
				let (stream, _) = accept.context("Daemon accept failed")?;
				spawn_client(stream, broker, shutdown_tx);
			}
		}
	}

	Ok(())
}

fn spawn_client<S>(stream: S, broker: &Arc<DeviceSessionBroker>, shutdown_tx: &watch::Sender<bool>)
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let broker = Arc::clone(broker);
	let shutdown_tx = shutdown_tx.clone();
	tokio::spawn(async move {
		if let Err(err) = handle_client(stream, broker, shutdown_tx).await {
			warn!(target = "msb.daemon", error = %err, "daemon connection error");
		}
	});
}

async fn handle_client<S>(stream: S, broker: Arc<DeviceSessionBroker>, shutdown_tx: watch::Sender<bool>) -> Result<()>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let (read_half, mut write_half) = tokio::io::split(stream);
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		let bytes = reader.read_line(&mut line).await.context("Failed reading daemon request")?;
		if bytes == 0 {
			break;
		}
		if line.trim().is_empty() {
			continue;
		}

		let request = match serde_json::from_str::<ControlRequest>(line.trim_end()) {
			Ok(req) => req,
			Err(err) => {
				let response = ControlResponse::error("invalid_request", err.to_string());
				write_response(&mut write_half, &response).await?;
				continue;
			}
		};

		let response = handle_request(&broker, &shutdown_tx, request).await;
		write_response(&mut write_half, &response).await?;
	}

	Ok(())
}

async fn write_response<W>(writer: &mut W, response: &ControlResponse) -> Result<()>
where
	W: tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(response).context("Failed to serialize response")?;
	writer
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing daemon response")?;
	writer.flush().await.context("Failed flushing daemon response")?;
	Ok(())
}

/// Runs one control request against the broker.
///
/// Broker failures become [`ControlResponse::Error`] carrying the error's
/// stable code and unmodified message.
pub async fn handle_request(broker: &DeviceSessionBroker, shutdown_tx: &watch::Sender<bool>, request: ControlRequest) -> ControlResponse {
	debug!(target = "msb.daemon", ?request, "request");
	match request {
		ControlRequest::Ping => ControlResponse::Pong,
		ControlRequest::GetDevices => ControlResponse::Devices {
			devices: broker.list_devices().await,
		},
		ControlRequest::StartServer { device_id } => match broker.start_server(&device_id).await {
			Ok(port) => ControlResponse::Server { device_id, port },
			Err(err) => broker_error(err),
		},
		ControlRequest::StopServer { device_id } => match broker.stop_server(&device_id).await {
			Ok(_) => ControlResponse::Ok,
			Err(err) => broker_error(err),
		},
		ControlRequest::ServerStatus { device_id } => ControlResponse::ServerStatus {
			status: broker.server_status(&device_id),
		},
		ControlRequest::GetSession { device_id } => match broker.get_or_create_session(&device_id).await {
			Ok(session_id) => ControlResponse::Session { session_id },
			Err(err) => broker_error(err),
		},
		ControlRequest::CloseSession { device_id } => match broker.close_session(&device_id).await {
			Ok(_) => ControlResponse::Ok,
			Err(err) => broker_error(err),
		},
		ControlRequest::SessionHealth { device_id } => ControlResponse::SessionHealth {
			health: broker.session_health(&device_id).await,
		},
		ControlRequest::Cleanup => ControlResponse::Cleanup {
			report: broker.cleanup().await,
		},
		ControlRequest::Shutdown => {
			let report = broker.cleanup().await;
			shutdown_tx.send_replace(true);
			ControlResponse::Cleanup { report }
		}
	}
}

fn broker_error(err: msb::Error) -> ControlResponse {
	if err.is_busy() {
		debug!(target = "msb.daemon", error = %err, "request rejected");
	} else {
		warn!(target = "msb.daemon", code = err.code(), error = %err, "request failed");
	}
	ControlResponse::error(err.code(), err.to_string())
}

#[cfg(test)]
mod tests {
	use msb::BrokerConfig;
	use msb::fake::{FakeBridge, FakeLauncher, FakeSessionApi};
	use msb_protocol::DeviceId;

	use super::*;

	struct Fixture {
		broker: Arc<DeviceSessionBroker>,
		api: Arc<FakeSessionApi>,
		launcher: Arc<FakeLauncher>,
		shutdown_tx: watch::Sender<bool>,
		shutdown_rx: watch::Receiver<bool>,
	}

	fn fixture() -> Fixture {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		let bridge = Arc::new(FakeBridge::android(&["emulator-5554"]));
		let broker = Arc::new(DeviceSessionBroker::new(BrokerConfig::default(), launcher.clone(), api.clone(), bridge));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Fixture {
			broker,
			api,
			launcher,
			shutdown_tx,
			shutdown_rx,
		}
	}

	fn device() -> DeviceId {
		DeviceId::from("emulator-5554")
	}

	#[tokio::test]
	async fn session_request_returns_reused_id() {
		let f = fixture();
		let request = ControlRequest::GetSession { device_id: device() };

		let first = handle_request(&f.broker, &f.shutdown_tx, request.clone()).await;
		let second = handle_request(&f.broker, &f.shutdown_tx, request).await;

		assert!(matches!(first, ControlResponse::Session { .. }), "unexpected response: {first:?}");
		assert_eq!(first, second);
		assert_eq!(f.api.create_count(), 1);
	}

	#[tokio::test]
	async fn busy_device_maps_to_busy_code() {
		let f = fixture();
		let _held = f.broker.locks().lease(&device()).unwrap();

		let response = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::GetSession { device_id: device() }).await;
		match response {
			ControlResponse::Error { error } => assert_eq!(error.code, "busy"),
			other => panic!("expected busy error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn create_failure_message_is_passed_through() {
		let f = fixture();
		f.api.fail_create("Could not find a connected Android device in 20000ms.");

		let response = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::GetSession { device_id: device() }).await;
		assert_eq!(
			response,
			ControlResponse::error("session_create_failed", "Could not find a connected Android device in 20000ms.")
		);
	}

	#[tokio::test]
	async fn server_lifecycle_requests() {
		let f = fixture();

		let started = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::StartServer { device_id: device() }).await;
		assert_eq!(
			started,
			ControlResponse::Server {
				device_id: device(),
				port: 4723
			}
		);

		match handle_request(&f.broker, &f.shutdown_tx, ControlRequest::ServerStatus { device_id: device() }).await {
			ControlResponse::ServerStatus { status: Some(status) } => assert_eq!(status.port, 4723),
			other => panic!("expected server status, got {other:?}"),
		}

		let stopped = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::StopServer { device_id: device() }).await;
		assert_eq!(stopped, ControlResponse::Ok);
		assert!(f.launcher.processes()[0].is_killed());

		let status = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::ServerStatus { device_id: device() }).await;
		assert_eq!(status, ControlResponse::ServerStatus { status: None });
	}

	#[tokio::test]
	async fn health_without_session_is_empty() {
		let f = fixture();
		let response = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::SessionHealth { device_id: device() }).await;
		assert_eq!(response, ControlResponse::SessionHealth { health: None });
	}

	#[tokio::test]
	async fn shutdown_cleans_up_and_signals() {
		let f = fixture();
		handle_request(&f.broker, &f.shutdown_tx, ControlRequest::GetSession { device_id: device() }).await;

		let response = handle_request(&f.broker, &f.shutdown_tx, ControlRequest::Shutdown).await;

		match response {
			ControlResponse::Cleanup { report } => {
				assert_eq!(report.sessions_closed, 1);
				assert_eq!(report.servers_stopped, 1);
			}
			other => panic!("expected cleanup report, got {other:?}"),
		}
		assert!(*f.shutdown_rx.borrow());
		assert_eq!(f.api.live_sessions(), 0);
	}

	#[tokio::test]
	async fn client_loop_answers_each_line() {
		let f = fixture();
		let (client, server) = tokio::io::duplex(4096);
		let task = tokio::spawn(handle_client(server, f.broker.clone(), f.shutdown_tx.clone()));

		let (read_half, mut write_half) = tokio::io::split(client);
		write_half
			.write_all(b"{\"type\":\"ping\"}\n\nnot json\n{\"type\":\"get-devices\"}\n")
			.await
			.unwrap();
		write_half.shutdown().await.unwrap();

		let mut lines = BufReader::new(read_half).lines();
		let mut responses = Vec::new();
		while let Some(line) = lines.next_line().await.unwrap() {
			responses.push(serde_json::from_str::<ControlResponse>(&line).unwrap());
		}
		task.await.unwrap().unwrap();

		assert_eq!(responses.len(), 3);
		assert_eq!(responses[0], ControlResponse::Pong);
		assert!(matches!(&responses[1], ControlResponse::Error { error } if error.code == "invalid_request"));
		match &responses[2] {
			ControlResponse::Devices { devices } => assert_eq!(devices[0].id, device()),
			other => panic!("expected devices, got {other:?}"),
		}
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn daemon_serves_socket_until_shutdown() {
		let f = fixture();
		let tmp = tempfile::tempdir().unwrap();
		let socket = tmp.path().join("msb.sock");

		let daemon = Daemon::bind_at(f.broker.clone(), socket.clone()).unwrap();
		let run = tokio::spawn(daemon.run());

		let stream = tokio::net::UnixStream::connect(&socket).await.unwrap();
		let pong = crate::daemon::send_request_stream(stream, &ControlRequest::Ping).await.unwrap();
		assert_eq!(pong, ControlResponse::Pong);

		let stream = tokio::net::UnixStream::connect(&socket).await.unwrap();
		let session = crate::daemon::send_request_stream(stream, &ControlRequest::GetSession { device_id: device() })
			.await
			.unwrap();
		assert!(matches!(session, ControlResponse::Session { .. }), "unexpected response: {session:?}");

		let stream = tokio::net::UnixStream::connect(&socket).await.unwrap();
		let report = crate::daemon::send_request_stream(stream, &ControlRequest::Shutdown).await.unwrap();
		assert!(matches!(report, ControlResponse::Cleanup { .. }), "unexpected response: {report:?}");

		run.await.unwrap().unwrap();
		assert!(!socket.exists());
		assert!(f.broker.pool().is_empty());
	}
}
