//! Server process pool: at most one automation server per device.
//!
//! Ports are handed out from a monotonic counter and never reused while the
//! pool exists, even after the server holding one is stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use msb_protocol::{DeviceId, ServerState, ServerStatus};
use msb_runtime::{ServerLauncher, ServerProcess, SessionApi};
use tracing::{debug, info, warn};

use crate::best_effort::BestEffort;
use crate::config::PollConfig;
use crate::error::{Error, Result};

/// One spawned automation server.
#[derive(Debug)]
pub struct ServerHandle {
	pub device: DeviceId,
	pub port: u16,
	pub state: ServerState,
	pub started_at: u64,
	/// `None` only between port reservation and a completed spawn.
	process: Option<Box<dyn ServerProcess>>,
}

impl ServerHandle {
	fn reserved(device: DeviceId, port: u16) -> Self {
		Self {
			device,
			port,
			state: ServerState::Pending,
			started_at: now_ts(),
			process: None,
		}
	}

	pub fn pid(&self) -> Option<u32> {
		self.process.as_ref().and_then(|p| p.pid())
	}

	pub fn is_live(&self) -> bool {
		self.state == ServerState::Live
	}

	/// Exit status if the process has exited.
	fn exited(&mut self) -> Option<String> {
		let process = self.process.as_mut()?;
		match process.exit_status() {
			Ok(status) => status,
			Err(e) => {
				debug!(target = "msb.pool", device = %self.device, error = %e, "exit status check failed");
				None
			}
		}
	}

	pub fn status(&self) -> ServerStatus {
		ServerStatus {
			device_id: self.device.clone(),
			port: self.port,
			state: self.state,
			pid: self.pid(),
			started_at: self.started_at,
		}
	}

	/// Kills the process; failures are reported, not raised.
	pub async fn terminate(mut self) -> BestEffort {
		let result = match self.process.as_mut() {
			Some(process) => process.kill().await,
			None => Ok(()),
		};
		info!(target = "msb.pool", device = %self.device, port = self.port, "server stopped");
		BestEffort::new("stop server", &self.device, result)
	}
}

pub struct ServerPool {
	launcher: Arc<dyn ServerLauncher>,
	api: Arc<dyn SessionApi>,
	readiness: PollConfig,
	handles: DashMap<DeviceId, ServerHandle>,
	next_port: AtomicU32,
}

impl ServerPool {
	pub fn new(launcher: Arc<dyn ServerLauncher>, api: Arc<dyn SessionApi>, start_port: u16, readiness: PollConfig) -> Self {
		Self {
			launcher,
			api,
			readiness,
			handles: DashMap::new(),
			next_port: AtomicU32::new(u32::from(start_port)),
		}
	}

	/// Returns the port of a live server for `device`, starting one if needed.
	///
	/// # Errors
	///
	/// - [`Error::Busy`] if another caller is starting this device's server
	/// - [`Error::ServerLaunch`] if the process cannot be spawned or exits while starting
	/// - [`Error::ServerStartTimeout`] if the status endpoint never answers
	/// - [`Error::PortsExhausted`] when the port counter has run past `u16::MAX`
	pub async fn ensure_server(&self, device: &DeviceId) -> Result<u16> {
		let stale = match self.handles.get_mut(device) {
			Some(mut handle) => {
				if !handle.is_live() {
					return Err(Error::Busy(device.clone()));
				}
				match handle.exited() {
					None => return Ok(handle.port),
					Some(status) => {
						warn!(target = "msb.pool", device = %device, port = handle.port, status = %status, "server exited; restarting");
						true
					}
				}
			}
			None => false,
		};
		if stale {
			self.handles.remove(device);
		}

		let port = match self.handles.entry(device.clone()) {
			Entry::Occupied(_) => return Err(Error::Busy(device.clone())),
			Entry::Vacant(slot) => {
				let port = self.allocate_port()?;
				slot.insert(ServerHandle::reserved(device.clone(), port));
				port
			}
		};
		let _reservation = Reservation {
			handles: &self.handles,
			device,
			port,
		};

		let process = match self.launcher.launch(device, port).await {
			Ok(process) => process,
			Err(e) => {
				self.handles.remove_if(device, |_, h| h.port == port);
				return Err(Error::ServerLaunch(e.to_string()));
			}
		};

		let orphan = match self.handles.get_mut(device) {
			Some(mut handle) if handle.port == port => {
				handle.process = Some(process);
				None
			}
			_ => Some(process),
		};
		if let Some(mut process) = orphan {
			BestEffort::new("stop server", device, process.kill().await).discard();
			return Err(Error::ServerLaunch(format!("server for {device} was stopped while starting")));
		}

		self.wait_ready(device, port).await
	}

	async fn wait_ready(&self, device: &DeviceId, port: u16) -> Result<u16> {
		let attempts = self.readiness.max_attempts;
		debug!(target = "msb.pool", device = %device, port, attempts, interval_ms = self.readiness.interval_ms, "waiting for server");

		for attempt in 1..=attempts {
			let exited = match self.handles.get_mut(device) {
				Some(mut handle) if handle.port == port => handle.exited(),
				_ => return Err(Error::ServerLaunch(format!("server for {device} was stopped while starting"))),
			};
			if let Some(status) = exited {
				self.handles.remove_if(device, |_, h| h.port == port);
				let exited = msb_runtime::Error::ServerExited { port, status };
				warn!(target = "msb.pool", device = %device, error = %exited, "server exited while starting");
				return Err(Error::ServerLaunch(exited.to_string()));
			}

			match self.api.status(port).await {
				Ok(()) => {
					return match self.handles.get_mut(device) {
						Some(mut handle) if handle.port == port => {
							handle.state = ServerState::Live;
							info!(target = "msb.pool", device = %device, port, attempt, "server ready");
							Ok(port)
						}
						_ => Err(Error::ServerLaunch(format!("server for {device} was stopped while starting"))),
					};
				}
				Err(e) => debug!(target = "msb.pool", device = %device, port, attempt, error = %e, "server not ready"),
			}

			if attempt < attempts {
				tokio::time::sleep(self.readiness.interval()).await;
			}
		}

		warn!(target = "msb.pool", device = %device, port, attempts, "server start timed out");
		if let Some((_, handle)) = self.handles.remove_if(device, |_, h| h.port == port) {
			handle.terminate().await.discard();
		}
		Err(Error::ServerStartTimeout {
			device: device.clone(),
			port,
			attempts,
		})
	}

	/// Stops the server for `device`. Returns whether one existed.
	pub async fn stop_server(&self, device: &DeviceId) -> bool {
		match self.take(device) {
			Some(handle) => {
				handle.terminate().await.discard();
				true
			}
			None => false,
		}
	}

	/// Removes the handle without terminating it.
	pub fn take(&self, device: &DeviceId) -> Option<ServerHandle> {
		self.handles.remove(device).map(|(_, handle)| handle)
	}

	/// Removes every handle. Used by shutdown.
	pub fn take_all(&self) -> Vec<ServerHandle> {
		let devices: Vec<DeviceId> = self.handles.iter().map(|entry| entry.key().clone()).collect();
		devices.iter().filter_map(|device| self.take(device)).collect()
	}

	/// Port of a server that answered readiness and has not exited since.
	pub fn live_port(&self, device: &DeviceId) -> Option<u16> {
		let mut handle = self.handles.get_mut(device)?;
		if !handle.is_live() || handle.exited().is_some() {
			return None;
		}
		Some(handle.port)
	}

	/// Port of a server in any state.
	pub fn port_of(&self, device: &DeviceId) -> Option<u16> {
		self.handles.get(device).map(|h| h.port)
	}

	pub fn status(&self, device: &DeviceId) -> Option<ServerStatus> {
		self.handles.get(device).map(|h| h.status())
	}

	/// Ports of every tracked server, sorted.
	pub fn ports(&self) -> Vec<u16> {
		let mut ports: Vec<u16> = self.handles.iter().map(|h| h.port).collect();
		ports.sort_unstable();
		ports
	}

	pub fn contains(&self, device: &DeviceId) -> bool {
		self.handles.contains_key(device)
	}

	pub fn len(&self) -> usize {
		self.handles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}

	fn allocate_port(&self) -> Result<u16> {
		let port = self
			.next_port
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
				(next <= u32::from(u16::MAX)).then_some(next + 1)
			})
			.map_err(|_| Error::PortsExhausted { last: u16::MAX })?;
		u16::try_from(port).map_err(|_| Error::PortsExhausted { last: u16::MAX })
	}
}

/// Releases a port reservation that never went live.
///
/// Dropped on every exit from `ensure_server`, including when the caller's
/// future is cancelled mid-start; a live handle or a newer reservation on
/// another port is left alone.
struct Reservation<'a> {
	handles: &'a DashMap<DeviceId, ServerHandle>,
	device: &'a DeviceId,
	port: u16,
}

impl Drop for Reservation<'_> {
	fn drop(&mut self) {
		let port = self.port;
		let Some((_, handle)) = self.handles.remove_if(self.device, |_, h| h.port == port && !h.is_live()) else {
			return;
		};
		warn!(target = "msb.pool", device = %self.device, port, "server start abandoned");
		match tokio::runtime::Handle::try_current() {
			Ok(runtime) => {
				runtime.spawn(async move { handle.terminate().await.discard() });
			}
			// Spawned servers are killed when their child handle drops.
			Err(_) => drop(handle),
		}
	}
}

fn now_ts() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::fake::{FakeLauncher, FakeSessionApi};

	fn pool(launcher: &Arc<FakeLauncher>, api: &Arc<FakeSessionApi>, start_port: u16) -> ServerPool {
		ServerPool::new(
			launcher.clone(),
			api.clone(),
			start_port,
			PollConfig {
				interval_ms: 5,
				max_attempts: 3,
			},
		)
	}

	#[tokio::test]
	async fn existing_live_server_is_reused() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		let pool = pool(&launcher, &api, 4723);
		let device = DeviceId::from("emulator-5554");

		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4723);
		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4723);
		assert_eq!(launcher.launches().len(), 1);
		assert_eq!(pool.status(&device).unwrap().state, ServerState::Live);
	}

	#[tokio::test]
	async fn readiness_is_polled_until_status_answers() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		api.ready_after(2);
		let pool = pool(&launcher, &api, 4723);

		assert_eq!(pool.ensure_server(&"emulator-5554".into()).await.unwrap(), 4723);
		assert_eq!(api.status_calls(), 3);
	}

	#[tokio::test]
	async fn exhausted_readiness_kills_and_forgets_server() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		api.set_ready(false);
		let pool = pool(&launcher, &api, 4723);
		let device = DeviceId::from("emulator-5554");

		let err = pool.ensure_server(&device).await.unwrap_err();
		assert!(
			matches!(err, Error::ServerStartTimeout { port: 4723, attempts: 3, .. }),
			"unexpected error: {err:?}"
		);
		assert_eq!(api.status_calls(), 3);
		assert!(!pool.contains(&device));
		assert!(launcher.processes()[0].is_killed());
	}

	#[tokio::test]
	async fn spawn_failure_is_reported_without_retry() {
		let launcher = Arc::new(FakeLauncher::new());
		launcher.fail_launches("spawn appium ENOENT");
		let api = Arc::new(FakeSessionApi::new());
		let pool = pool(&launcher, &api, 4723);
		let device = DeviceId::from("emulator-5554");

		let err = pool.ensure_server(&device).await.unwrap_err();
		assert!(matches!(&err, Error::ServerLaunch(msg) if msg.contains("ENOENT")), "unexpected error: {err:?}");
		assert_eq!(api.status_calls(), 0);
		assert!(!pool.contains(&device));
	}

	#[tokio::test]
	async fn exited_server_is_replaced_on_a_fresh_port() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		let pool = pool(&launcher, &api, 4723);
		let device = DeviceId::from("emulator-5554");

		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4723);
		launcher.processes()[0].crash();
		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4724);
		assert_eq!(launcher.launches().len(), 2);
	}

	#[tokio::test]
	async fn process_exit_during_startup_stops_polling() {
		let launcher = Arc::new(FakeLauncher::new());
		launcher.exit_on_launch();
		let api = Arc::new(FakeSessionApi::new());
		api.set_ready(false);
		let pool = pool(&launcher, &api, 4723);
		let device = DeviceId::from("emulator-5554");

		let err = pool.ensure_server(&device).await.unwrap_err();
		assert!(
			matches!(&err, Error::ServerLaunch(msg) if msg.contains("port 4723 exited")),
			"unexpected error: {err:?}"
		);
		assert_eq!(api.status_calls(), 0);
		assert!(!pool.contains(&device));
	}

	#[tokio::test]
	async fn cancelled_start_releases_the_device() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		api.set_ready(false);
		let pool = ServerPool::new(
			launcher.clone(),
			api.clone(),
			4723,
			PollConfig {
				interval_ms: 50,
				max_attempts: 100,
			},
		);
		let device = DeviceId::from("emulator-5554");

		let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.ensure_server(&device)).await;
		assert!(cancelled.is_err());
		assert!(!pool.contains(&device));

		for _ in 0..50 {
			if launcher.processes()[0].is_killed() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
		assert!(launcher.processes()[0].is_killed());

		api.set_ready(true);
		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4724);
		assert_eq!(launcher.launches().len(), 2);
	}

	#[tokio::test]
	async fn stopped_ports_are_not_reused() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		let pool = pool(&launcher, &api, 4723);
		let device = DeviceId::from("emulator-5554");

		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4723);
		assert!(pool.stop_server(&device).await);
		assert!(!pool.stop_server(&device).await);
		assert_eq!(pool.ensure_server(&device).await.unwrap(), 4724);
		assert!(launcher.processes()[0].is_killed());
	}

	#[tokio::test]
	async fn port_counter_stops_at_u16_max() {
		let launcher = Arc::new(FakeLauncher::new());
		let api = Arc::new(FakeSessionApi::new());
		let pool = pool(&launcher, &api, u16::MAX);

		assert_eq!(pool.ensure_server(&"a".into()).await.unwrap(), u16::MAX);
		let err = pool.ensure_server(&"b".into()).await.unwrap_err();
		assert!(matches!(err, Error::PortsExhausted { .. }), "unexpected error: {err:?}");
		assert!(!pool.contains(&"b".into()));
	}
}
