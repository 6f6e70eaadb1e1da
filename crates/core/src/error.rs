//! Broker error taxonomy.

use msb_protocol::DeviceId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// Another acquisition for this device is in flight. Retry later.
	#[error("device {0} is busy")]
	Busy(DeviceId),

	/// Server never answered its status endpoint within the readiness budget.
	#[error("automation server for {device} on port {port} did not become ready after {attempts} attempts")]
	ServerStartTimeout { device: DeviceId, port: u16, attempts: u32 },

	/// Server rejected or could not create a session. Message is the server's, unchanged.
	#[error("{0}")]
	SessionCreateFailed(String),

	/// Bridge tool missing or erroring.
	#[error("device discovery unavailable: {0}")]
	DiscoveryUnavailable(String),

	/// Server process could not be spawned or died while starting.
	#[error("{0}")]
	ServerLaunch(String),

	#[error("no free ports left (next would exceed {last})")]
	PortsExhausted { last: u16 },

	#[error("no automation server running for device {0}")]
	NoServer(DeviceId),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Runtime(#[from] msb_runtime::Error),
}

impl Error {
	/// Stable snake_case code used in control-surface error envelopes.
	pub fn code(&self) -> &'static str {
		match self {
			Error::Busy(_) => "busy",
			Error::ServerStartTimeout { .. } => "server_start_timeout",
			Error::SessionCreateFailed(_) => "session_create_failed",
			Error::DiscoveryUnavailable(_) => "discovery_unavailable",
			Error::ServerLaunch(_) => "server_launch_failed",
			Error::PortsExhausted { .. } => "ports_exhausted",
			Error::NoServer(_) => "no_server",
			Error::Config(_) => "invalid_config",
			Error::Runtime(_) => "runtime_error",
		}
	}

	pub fn is_busy(&self) -> bool {
		matches!(self, Error::Busy(_))
	}
}
