//! Device session broker.
//!
//! Ties the lock table, server pool, and session registry together. Every
//! mutating operation on a device runs under that device's lease; a second
//! caller gets [`Error::Busy`] immediately instead of queueing.

use std::sync::Arc;

use dashmap::DashMap;
use msb_protocol::{CleanupFailure, CleanupReport, CleanupStage, DeviceId, DeviceInfo, Platform, ServerStatus, SessionHealth, SessionId};
use msb_runtime::{
	AdbBridge, AppiumLauncher, DeviceBridge, HostBridge, IosBridge, ServerCommand, ServerLauncher, SessionApi, WebDriverClient, locate_server,
};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::lock::{DeviceLease, DeviceLockTable};
use crate::pool::ServerPool;
use crate::registry::SessionRegistry;
use crate::state::DeviceState;

pub struct DeviceSessionBroker {
	config: BrokerConfig,
	bridge: Arc<dyn DeviceBridge>,
	pool: ServerPool,
	registry: SessionRegistry,
	locks: DeviceLockTable,
	/// Absent means `Idle`.
	states: DashMap<DeviceId, DeviceState>,
	/// Learned from discovery; unknown devices use `config.default_platform`.
	platforms: DashMap<DeviceId, Platform>,
}

impl DeviceSessionBroker {
	pub fn new(config: BrokerConfig, launcher: Arc<dyn ServerLauncher>, api: Arc<dyn SessionApi>, bridge: Arc<dyn DeviceBridge>) -> Self {
		let pool = ServerPool::new(launcher, api.clone(), config.start_port, config.readiness);
		let registry = SessionRegistry::new(api, bridge.clone(), config.session_create_timeout(), config.extra_capabilities.clone());
		Self {
			config,
			bridge,
			pool,
			registry,
			locks: DeviceLockTable::new(),
			states: DashMap::new(),
			platforms: DashMap::new(),
		}
	}

	/// Builds a broker backed by a real Appium binary, HTTP client, and `adb`.
	///
	/// A missing Appium binary is not fatal here: discovery still works and
	/// server starts fail with a launch error naming the lookup.
	pub fn from_config(config: BrokerConfig) -> Result<Self> {
		config.validate()?;

		let command = match locate_server(config.server_binary.as_deref()) {
			Ok(command) => command,
			Err(e) => {
				warn!(target = "msb.broker", error = %e, "appium not located; falling back to PATH lookup at launch");
				ServerCommand::from_path("appium")
			}
		};
		debug!(target = "msb.broker", program = %command.program.display(), "using automation server");

		let launcher = AppiumLauncher::new(command, config.host.clone(), config.base_path.clone()).with_extra_args(config.server_args.clone());
		let api = WebDriverClient::new(config.host.clone(), config.base_path.clone(), config.probe_timeout())?;
		let bridge = HostBridge::new(Some(AdbBridge::default()), config.ios_discovery.then(IosBridge::default));

		Ok(Self::new(config, Arc::new(launcher), Arc::new(api), Arc::new(bridge)))
	}

	/// Connected devices. Discovery failure or timeout yields an empty list.
	pub async fn list_devices(&self) -> Vec<DeviceInfo> {
		let timeout = self.config.discovery_timeout();
		match tokio::time::timeout(timeout, self.bridge.list_devices()).await {
			Ok(Ok(devices)) => {
				for device in &devices {
					self.platforms.insert(device.id.clone(), device.platform);
				}
				debug!(target = "msb.broker", count = devices.len(), "devices listed");
				devices
			}
			Ok(Err(e)) => {
				let e = Error::DiscoveryUnavailable(e.to_string());
				warn!(target = "msb.broker", error = %e, "device discovery failed");
				Vec::new()
			}
			Err(_) => {
				warn!(target = "msb.broker", timeout_ms = self.config.discovery_timeout_ms, "device discovery timed out");
				Vec::new()
			}
		}
	}

	/// Returns a live session for `device`, reusing the recorded one when the
	/// server still knows it and otherwise starting whatever is missing.
	///
	/// # Errors
	///
	/// - [`Error::Busy`] if another operation on `device` is in flight
	/// - [`Error::ServerLaunch`] / [`Error::ServerStartTimeout`] if no server comes up
	/// - [`Error::SessionCreateFailed`] with the server's message
	pub async fn get_or_create_session(&self, device: &DeviceId) -> Result<SessionId> {
		let _lease = self.lease(device)?;

		let live_port = self.pool.live_port(device);
		match live_port {
			Some(port) => {
				if let Some(session_id) = self.registry.get_live_session(device, port).await {
					self.advance(device, DeviceState::SessionReady);
					return Ok(session_id);
				}
			}
			None => {
				self.registry.remove(device);
				self.advance(device, DeviceState::ServerPending);
			}
		}

		let port = match self.pool.ensure_server(device).await {
			Ok(port) => port,
			Err(e) => {
				self.advance(device, DeviceState::Idle);
				return Err(e);
			}
		};
		self.advance(device, DeviceState::ServerReady);

		self.advance(device, DeviceState::SessionPending);
		match self.registry.create_session(device, self.platform_of(device), port).await {
			Ok(session_id) if self.pool.live_port(device) != Some(port) => {
				warn!(target = "msb.broker", device = %device, port, session_id = %session_id, "server stopped while the session was being created");
				self.registry.abandon(device, &session_id, port).await.discard();
				self.advance(device, DeviceState::Idle);
				Err(Error::ServerLaunch(format!("server for {device} was stopped while starting")))
			}
			Ok(session_id) => {
				self.advance(device, DeviceState::SessionReady);
				Ok(session_id)
			}
			Err(e) => {
				warn!(target = "msb.broker", device = %device, error = %e, "session create failed");
				self.advance(device, DeviceState::ServerReady);
				Err(e)
			}
		}
	}

	/// Starts (or reuses) the server for `device` without creating a session.
	pub async fn start_server(&self, device: &DeviceId) -> Result<u16> {
		let _lease = self.lease(device)?;
		if let Some(port) = self.pool.live_port(device) {
			return Ok(port);
		}

		self.registry.remove(device);
		self.advance(device, DeviceState::ServerPending);
		match self.pool.ensure_server(device).await {
			Ok(port) => {
				self.advance(device, DeviceState::ServerReady);
				Ok(port)
			}
			Err(e) => {
				self.advance(device, DeviceState::Idle);
				Err(e)
			}
		}
	}

	/// Closes any session and stops the server for `device`.
	/// Returns whether a server was running.
	pub async fn stop_server(&self, device: &DeviceId) -> Result<bool> {
		let _lease = self.lease(device)?;
		if let Some(outcome) = self.registry.close_session(device, self.pool.live_port(device)).await {
			outcome.discard();
		}
		let stopped = self.pool.stop_server(device).await;
		self.advance(device, DeviceState::Idle);
		Ok(stopped)
	}

	/// Ends the session for `device` but leaves its server running.
	/// Returns whether a session was recorded.
	pub async fn close_session(&self, device: &DeviceId) -> Result<bool> {
		let _lease = self.lease(device)?;
		let port = self.pool.live_port(device);
		let Some(outcome) = self.registry.close_session(device, port).await else {
			return Ok(false);
		};
		outcome.discard();
		match port {
			Some(_) => self.advance(device, DeviceState::ServerReady),
			None => self.advance(device, DeviceState::Idle),
		}
		Ok(true)
	}

	pub fn server_status(&self, device: &DeviceId) -> Option<ServerStatus> {
		self.pool.status(device)
	}

	/// Probes the recorded session, if any, without discarding it.
	pub async fn session_health(&self, device: &DeviceId) -> Option<SessionHealth> {
		self.registry.health(device, self.pool.live_port(device)).await
	}

	/// Closes every session and kills every server.
	///
	/// Never fails: per-device errors are logged and collected in the report.
	/// Locks and states are reset even for devices with an operation in flight.
	pub async fn cleanup(&self) -> CleanupReport {
		let mut report = CleanupReport::default();

		for device in self.registry.devices() {
			let port = self.pool.live_port(&device);
			let Some(outcome) = self.registry.close_session(&device, port).await else {
				continue;
			};
			match outcome.into_failure() {
				None => report.sessions_closed += 1,
				Some(message) => report.failures.push(CleanupFailure {
					device_id: device,
					stage: CleanupStage::CloseSession,
					message,
				}),
			}
		}

		for handle in self.pool.take_all() {
			let device = handle.device.clone();
			match handle.terminate().await.into_failure() {
				None => report.servers_stopped += 1,
				Some(message) => report.failures.push(CleanupFailure {
					device_id: device,
					stage: CleanupStage::StopServer,
					message,
				}),
			}
		}

		self.registry.clear();
		self.locks.clear();
		self.states.clear();

		info!(
			target = "msb.broker",
			sessions_closed = report.sessions_closed,
			servers_stopped = report.servers_stopped,
			failures = report.failures.len(),
			"cleanup finished"
		);
		report
	}

	pub fn state(&self, device: &DeviceId) -> DeviceState {
		self.states.get(device).map(|s| *s).unwrap_or_default()
	}

	/// Overrides the platform used for `device`'s next session.
	pub fn set_platform(&self, device: &DeviceId, platform: Platform) {
		self.platforms.insert(device.clone(), platform);
	}

	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	pub fn pool(&self) -> &ServerPool {
		&self.pool
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	pub fn locks(&self) -> &DeviceLockTable {
		&self.locks
	}

	fn lease(&self, device: &DeviceId) -> Result<DeviceLease> {
		self.locks.lease(device).ok_or_else(|| {
			debug!(target = "msb.broker", device = %device, "device busy");
			Error::Busy(device.clone())
		})
	}

	fn platform_of(&self, device: &DeviceId) -> Platform {
		self.platforms.get(device).map(|p| *p).unwrap_or(self.config.default_platform)
	}

	fn advance(&self, device: &DeviceId, next: DeviceState) {
		if next == DeviceState::Idle {
			self.states.remove(device);
			return;
		}
		let mut state = self.states.entry(device.clone()).or_default();
		let current = *state;
		if current == next {
			return;
		}
		if !current.can_transition_to(next) {
			warn!(target = "msb.broker", device = %device, from = ?current, to = ?next, "unexpected state transition");
		}
		*state = next;
	}
}
