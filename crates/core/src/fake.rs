//! In-memory stand-ins for the server launcher, session API, and device bridge.
//!
//! They never spawn processes or open sockets, and expose switches for the
//! failure modes the broker must tolerate: processes that die, servers that
//! never answer, sessions killed from outside, deletes that fail.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use msb_protocol::{Capabilities, DeviceId, DeviceInfo, Platform, SessionId};
use msb_runtime::{DeviceBridge, Error, Result, ServerLauncher, ServerProcess, SessionApi};
use parking_lot::Mutex;

/// Observer for one launched fake process.
#[derive(Debug, Clone)]
pub struct FakeProcessHandle {
	pub device: DeviceId,
	pub port: u16,
	killed: Arc<AtomicBool>,
	exited: Arc<AtomicBool>,
}

impl FakeProcessHandle {
	fn new(device: DeviceId, port: u16) -> Self {
		Self {
			device,
			port,
			killed: Arc::new(AtomicBool::new(false)),
			exited: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn is_killed(&self) -> bool {
		self.killed.load(Ordering::SeqCst)
	}

	/// Simulates the process dying on its own.
	pub fn crash(&self) {
		self.exited.store(true, Ordering::SeqCst);
	}
}

#[derive(Debug)]
struct FakeProcess {
	handle: FakeProcessHandle,
	pid: u32,
}

#[async_trait]
impl ServerProcess for FakeProcess {
	fn pid(&self) -> Option<u32> {
		Some(self.pid)
	}

	fn exit_status(&mut self) -> Result<Option<String>> {
		if self.handle.is_killed() {
			Ok(Some("signal: 9 (SIGKILL)".into()))
		} else if self.handle.exited.load(Ordering::SeqCst) {
			Ok(Some("exit status: 1".into()))
		} else {
			Ok(None)
		}
	}

	async fn kill(&mut self) -> Result<()> {
		self.handle.killed.store(true, Ordering::SeqCst);
		Ok(())
	}
}

#[derive(Default)]
struct LauncherState {
	processes: Vec<FakeProcessHandle>,
	failure: Option<String>,
	exit_on_launch: bool,
}

#[derive(Default)]
pub struct FakeLauncher {
	state: Mutex<LauncherState>,
}

impl FakeLauncher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every later launch fails with `message`.
	pub fn fail_launches(&self, message: impl Into<String>) {
		self.state.lock().failure = Some(message.into());
	}

	/// Every later launch yields a process that has already exited.
	pub fn exit_on_launch(&self) {
		self.state.lock().exit_on_launch = true;
	}

	/// `(device, port)` of every successful launch, in order.
	pub fn launches(&self) -> Vec<(DeviceId, u16)> {
		self.state.lock().processes.iter().map(|p| (p.device.clone(), p.port)).collect()
	}

	pub fn processes(&self) -> Vec<FakeProcessHandle> {
		self.state.lock().processes.clone()
	}
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
	async fn launch(&self, device: &DeviceId, port: u16) -> Result<Box<dyn ServerProcess>> {
		let mut state = self.state.lock();
		if let Some(message) = &state.failure {
			return Err(Error::LaunchFailed(message.clone()));
		}
		let handle = FakeProcessHandle::new(device.clone(), port);
		if state.exit_on_launch {
			handle.crash();
		}
		state.processes.push(handle.clone());
		let pid = 10_000 + state.processes.len() as u32;
		Ok(Box::new(FakeProcess { handle, pid }))
	}
}

struct ApiState {
	/// Session id to the port it was created on.
	sessions: HashMap<SessionId, u16>,
	ready: bool,
	not_ready_for: u32,
	create_error: Option<String>,
	create_delay: Option<Duration>,
	failing_deletes: HashSet<SessionId>,
	last_capabilities: Option<Capabilities>,
	status_calls: usize,
	creates: usize,
	probes: usize,
	deletes: usize,
}

impl Default for ApiState {
	fn default() -> Self {
		Self {
			sessions: HashMap::new(),
			ready: true,
			not_ready_for: 0,
			create_error: None,
			create_delay: None,
			failing_deletes: HashSet::new(),
			last_capabilities: None,
			status_calls: 0,
			creates: 0,
			probes: 0,
			deletes: 0,
		}
	}
}

/// Session API backed by a map. Ready and accepting sessions by default.
#[derive(Default)]
pub struct FakeSessionApi {
	state: Mutex<ApiState>,
}

impl FakeSessionApi {
	pub fn new() -> Self {
		Self::default()
	}

	/// `false` makes every status call fail.
	pub fn set_ready(&self, ready: bool) {
		self.state.lock().ready = ready;
	}

	/// The next `failures` status calls fail, later ones succeed.
	pub fn ready_after(&self, failures: u32) {
		self.state.lock().not_ready_for = failures;
	}

	pub fn fail_create(&self, message: impl Into<String>) {
		self.state.lock().create_error = Some(message.into());
	}

	pub fn accept_create(&self) {
		self.state.lock().create_error = None;
	}

	/// Holds every create for `delay` before answering.
	pub fn set_create_delay(&self, delay: Duration) {
		self.state.lock().create_delay = Some(delay);
	}

	pub fn fail_delete(&self, session_id: &str) {
		self.state.lock().failing_deletes.insert(session_id.to_string());
	}

	/// Drops a session as if the server had ended it.
	pub fn kill_session(&self, session_id: &str) {
		self.state.lock().sessions.remove(session_id);
	}

	pub fn is_live(&self, session_id: &str) -> bool {
		self.state.lock().sessions.contains_key(session_id)
	}

	pub fn live_sessions(&self) -> usize {
		self.state.lock().sessions.len()
	}

	pub fn last_capabilities(&self) -> Option<Capabilities> {
		self.state.lock().last_capabilities.clone()
	}

	pub fn status_calls(&self) -> usize {
		self.state.lock().status_calls
	}

	pub fn create_count(&self) -> usize {
		self.state.lock().creates
	}

	pub fn probe_count(&self) -> usize {
		self.state.lock().probes
	}

	pub fn delete_count(&self) -> usize {
		self.state.lock().deletes
	}
}

#[async_trait]
impl SessionApi for FakeSessionApi {
	async fn status(&self, port: u16) -> Result<()> {
		let mut state = self.state.lock();
		state.status_calls += 1;
		if !state.ready {
			return Err(Error::Http(format!("connection refused on port {port}")));
		}
		if state.not_ready_for > 0 {
			state.not_ready_for -= 1;
			return Err(Error::Http(format!("connection refused on port {port}")));
		}
		Ok(())
	}

	async fn create_session(&self, port: u16, capabilities: Capabilities, _timeout: Duration) -> Result<SessionId> {
		let delay = self.state.lock().create_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let mut state = self.state.lock();
		state.creates += 1;
		state.last_capabilities = Some(capabilities);
		if let Some(message) = &state.create_error {
			return Err(Error::Remote {
				status: 500,
				error: "session not created".into(),
				message: message.clone(),
			});
		}
		let session_id = uuid::Uuid::new_v4().to_string();
		state.sessions.insert(session_id.clone(), port);
		Ok(session_id)
	}

	async fn probe_session(&self, port: u16, session_id: &str) -> Result<()> {
		let mut state = self.state.lock();
		state.probes += 1;
		match state.sessions.get(session_id) {
			Some(&owner) if owner == port => Ok(()),
			_ => Err(Error::SessionNotFound(session_id.to_string())),
		}
	}

	async fn delete_session(&self, _port: u16, session_id: &str) -> Result<()> {
		let mut state = self.state.lock();
		state.deletes += 1;
		state.sessions.remove(session_id);
		if state.failing_deletes.contains(session_id) {
			return Err(Error::Http("connection reset by peer".into()));
		}
		Ok(())
	}
}

#[derive(Default)]
struct BridgeState {
	devices: Vec<DeviceInfo>,
	list_failure: bool,
	list_delay: Option<Duration>,
	cleanup_failure: bool,
	cleared: Vec<DeviceId>,
}

#[derive(Default)]
pub struct FakeBridge {
	state: Mutex<BridgeState>,
}

impl FakeBridge {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
		let bridge = Self::new();
		bridge.state.lock().devices = devices;
		bridge
	}

	/// Android devices named after their ids.
	pub fn android(ids: &[&str]) -> Self {
		Self::with_devices(ids.iter().map(|id| DeviceInfo::unnamed(*id, Platform::Android)).collect())
	}

	pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
		self.state.lock().devices = devices;
	}

	pub fn fail_listing(&self, fail: bool) {
		self.state.lock().list_failure = fail;
	}

	pub fn set_list_delay(&self, delay: Duration) {
		self.state.lock().list_delay = Some(delay);
	}

	pub fn fail_cleanup(&self, fail: bool) {
		self.state.lock().cleanup_failure = fail;
	}

	/// Devices whose driver artifacts were cleared, in order.
	pub fn cleared(&self) -> Vec<DeviceId> {
		self.state.lock().cleared.clone()
	}
}

#[async_trait]
impl DeviceBridge for FakeBridge {
	async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
		let delay = self.state.lock().list_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let state = self.state.lock();
		if state.list_failure {
			return Err(Error::BridgeUnavailable("adb: No such file or directory".into()));
		}
		Ok(state.devices.clone())
	}

	async fn clear_driver_artifacts(&self, device: &DeviceId, _platform: Platform) -> Result<()> {
		let mut state = self.state.lock();
		state.cleared.push(device.clone());
		if state.cleanup_failure {
			return Err(Error::BridgeFailed {
				command: "adb uninstall".into(),
				message: "device offline".into(),
			});
		}
		Ok(())
	}
}
