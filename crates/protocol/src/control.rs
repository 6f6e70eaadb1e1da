//! Control-surface messages exchanged between the daemon and its clients.
//!
//! Messages are newline-delimited JSON objects tagged by `type`. Every request
//! yields exactly one response; failures come back as [`ControlResponse::Error`]
//! rather than a dropped connection.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceId, DeviceInfo};
use crate::webdriver::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRequest {
	Ping,
	GetDevices,
	StartServer { device_id: DeviceId },
	StopServer { device_id: DeviceId },
	ServerStatus { device_id: DeviceId },
	GetSession { device_id: DeviceId },
	CloseSession { device_id: DeviceId },
	SessionHealth { device_id: DeviceId },
	/// Close every session and stop every server, leaving the daemon running.
	Cleanup,
	/// Clean up, then stop the daemon.
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlResponse {
	Pong,
	Devices { devices: Vec<DeviceInfo> },
	Server { device_id: DeviceId, port: u16 },
	ServerStatus { status: Option<ServerStatus> },
	Session { session_id: SessionId },
	SessionHealth { health: Option<SessionHealth> },
	Cleanup { report: CleanupReport },
	Ok,
	Error { error: ControlError },
}

impl ControlResponse {
	pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
		ControlResponse::Error {
			error: ControlError {
				code: code.into(),
				message: message.into(),
			},
		}
	}

	pub fn is_error(&self) -> bool {
		matches!(self, ControlResponse::Error { .. })
	}
}

/// Error envelope; `message` is passed through from the failing layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlError {
	pub code: String,
	pub message: String,
}

/// Readiness of a device's automation server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
	/// Spawned, status endpoint not yet answering.
	Pending,
	Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
	pub device_id: DeviceId,
	pub port: u16,
	pub state: ServerState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pid: Option<u32>,
	/// Unix timestamp (seconds) of the spawn.
	pub started_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHealth {
	pub device_id: DeviceId,
	pub session_id: SessionId,
	pub alive: bool,
}

/// Outcome of a full broker cleanup. Failures are reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
	pub sessions_closed: usize,
	pub servers_stopped: usize,
	#[serde(default)]
	pub failures: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
	pub device_id: DeviceId,
	pub stage: CleanupStage,
	pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStage {
	CloseSession,
	StopServer,
}
