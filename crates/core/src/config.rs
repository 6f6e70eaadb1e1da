//! Broker configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use msb_protocol::{Capabilities, Platform};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_START_PORT: u16 = 4723;
pub const DEFAULT_BASE_PATH: &str = "/wd/hub";
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Bounded readiness polling: `max_attempts` status calls, `interval_ms` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
	pub interval_ms: u64,
	pub max_attempts: u32,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			interval_ms: 1000,
			max_attempts: 30,
		}
	}
}

impl PollConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
	/// Appium executable. `None` searches `MSB_APPIUM_PATH`, `node_modules`, then `PATH`.
	pub server_binary: Option<PathBuf>,
	/// Extra arguments appended to every server invocation.
	pub server_args: Vec<String>,
	pub host: String,
	pub base_path: String,
	/// First port handed out; later servers count up from here.
	pub start_port: u16,
	pub readiness: PollConfig,
	pub session_create_timeout_ms: u64,
	/// Bounds status, liveness probe, and delete calls.
	pub probe_timeout_ms: u64,
	pub discovery_timeout_ms: u64,
	/// Platform assumed for devices discovery has not reported.
	pub default_platform: Platform,
	/// Also list iOS devices through libimobiledevice.
	pub ios_discovery: bool,
	/// Merged into every session's capabilities; never overrides platform or identifier keys.
	pub extra_capabilities: Capabilities,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			server_binary: None,
			server_args: Vec::new(),
			host: DEFAULT_HOST.to_string(),
			base_path: DEFAULT_BASE_PATH.to_string(),
			start_port: DEFAULT_START_PORT,
			readiness: PollConfig::default(),
			session_create_timeout_ms: 60_000,
			probe_timeout_ms: 5_000,
			discovery_timeout_ms: 10_000,
			default_platform: Platform::Android,
			ios_discovery: false,
			extra_capabilities: Capabilities::new(),
		}
	}
}

impl BrokerConfig {
	/// Reads a JSON config file.
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
		let config: Self = serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
		config.validate()?;
		Ok(config)
	}

	/// Loads `path` if given, else `default_path` if it exists, else defaults.
	pub fn load_or_default(path: Option<&Path>, default_path: Option<&Path>) -> Result<Self> {
		match (path, default_path) {
			(Some(path), _) => Self::load(path),
			(None, Some(path)) if path.exists() => Self::load(path),
			_ => Ok(Self::default()),
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.start_port == 0 {
			return Err(Error::Config("start_port must be non-zero".into()));
		}
		if self.readiness.max_attempts == 0 {
			return Err(Error::Config("readiness.max_attempts must be at least 1".into()));
		}
		Ok(())
	}

	pub fn session_create_timeout(&self) -> Duration {
		Duration::from_millis(self.session_create_timeout_ms)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_millis(self.probe_timeout_ms)
	}

	pub fn discovery_timeout(&self) -> Duration {
		Duration::from_millis(self.discovery_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_appium_conventions() {
		let config = BrokerConfig::default();
		assert_eq!(config.start_port, 4723);
		assert_eq!(config.base_path, "/wd/hub");
		assert_eq!(config.readiness, PollConfig { interval_ms: 1000, max_attempts: 30 });
		assert_eq!(config.session_create_timeout(), Duration::from_secs(60));
	}

	#[test]
	fn partial_file_fills_in_defaults() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("config.json");
		std::fs::write(&path, r#"{ "start_port": 5000, "readiness": { "max_attempts": 5 } }"#).unwrap();

		let config = BrokerConfig::load(&path).unwrap();
		assert_eq!(config.start_port, 5000);
		assert_eq!(config.readiness.max_attempts, 5);
		assert_eq!(config.readiness.interval_ms, 1000);
		assert_eq!(config.host, "127.0.0.1");
	}

	#[test]
	fn zero_attempts_is_rejected() {
		let tmp = tempfile::tempdir().unwrap();
		let path = tmp.path().join("config.json");
		std::fs::write(&path, r#"{ "readiness": { "max_attempts": 0 } }"#).unwrap();
		assert!(matches!(BrokerConfig::load(&path), Err(Error::Config(_))));
	}

	#[test]
	fn missing_default_file_yields_defaults() {
		let tmp = tempfile::tempdir().unwrap();
		let absent = tmp.path().join("absent.json");
		let config = BrokerConfig::load_or_default(None, Some(&absent)).unwrap();
		assert_eq!(config, BrokerConfig::default());
	}
}
