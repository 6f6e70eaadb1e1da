//! Device discovery through platform bridge tools.
//!
//! Android devices come from `adb devices`; iOS devices from `idevice_id -l`
//! (libimobiledevice). A missing tool surfaces as [`Error::BridgeUnavailable`]
//! so callers can degrade to an empty list.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use msb_protocol::{DeviceId, DeviceInfo, Platform};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Android packages left behind by previous UiAutomator2 sessions.
pub const UIAUTOMATOR2_PACKAGES: [&str; 2] = ["io.appium.uiautomator2.server", "io.appium.uiautomator2.server.test"];

/// Source of attached devices and device-side housekeeping.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
	/// Currently attached devices. May be empty.
	async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

	/// Removes automation-driver artifacts left on `device` by a previous run.
	async fn clear_driver_artifacts(&self, device: &DeviceId, platform: Platform) -> Result<()>;
}

/// Android bridge backed by `adb`.
#[derive(Debug, Clone)]
pub struct AdbBridge {
	adb: PathBuf,
	resolve_names: bool,
}

impl Default for AdbBridge {
	fn default() -> Self {
		Self::new(default_adb_path())
	}
}

impl AdbBridge {
	pub fn new(adb: impl Into<PathBuf>) -> Self {
		Self {
			adb: adb.into(),
			resolve_names: true,
		}
	}

	/// Skips the per-device model lookup; names fall back to identifiers.
	pub fn without_names(mut self) -> Self {
		self.resolve_names = false;
		self
	}

	async fn device_name(&self, id: &DeviceId) -> String {
		match run_tool(&self.adb, ["-s", id.as_str(), "shell", "getprop", "ro.product.model"]).await {
			Ok(model) if !model.trim().is_empty() => model.trim().to_string(),
			Ok(_) => id.to_string(),
			Err(e) => {
				debug!(target = "msb.bridge", device = %id, error = %e, "model lookup failed");
				id.to_string()
			}
		}
	}
}

#[async_trait]
impl DeviceBridge for AdbBridge {
	async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
		let stdout = run_tool(&self.adb, ["devices"]).await?;
		let ids = parse_adb_devices(&stdout);

		let mut devices = Vec::with_capacity(ids.len());
		for id in ids {
			let name = if self.resolve_names { self.device_name(&id).await } else { id.to_string() };
			devices.push(DeviceInfo {
				id,
				name,
				platform: Platform::Android,
			});
		}
		Ok(devices)
	}

	async fn clear_driver_artifacts(&self, device: &DeviceId, platform: Platform) -> Result<()> {
		if platform != Platform::Android {
			return Ok(());
		}

		let mut failures = Vec::new();
		for package in UIAUTOMATOR2_PACKAGES {
			match run_tool(&self.adb, ["-s", device.as_str(), "uninstall", package]).await {
				Ok(_) => debug!(target = "msb.bridge", device = %device, package, "driver package removed"),
				Err(Error::BridgeFailed { message, .. }) if package_missing(&message) => {
					debug!(target = "msb.bridge", device = %device, package, "driver package not installed");
				}
				Err(e) => failures.push(format!("{package}: {e}")),
			}
		}

		if failures.is_empty() {
			Ok(())
		} else {
			Err(Error::BridgeFailed {
				command: "adb uninstall".into(),
				message: failures.join("; "),
			})
		}
	}
}

/// iOS bridge backed by libimobiledevice.
#[derive(Debug, Clone)]
pub struct IosBridge {
	idevice_id: PathBuf,
	ideviceinfo: PathBuf,
}

impl Default for IosBridge {
	fn default() -> Self {
		Self {
			idevice_id: PathBuf::from("idevice_id"),
			ideviceinfo: PathBuf::from("ideviceinfo"),
		}
	}
}

#[async_trait]
impl DeviceBridge for IosBridge {
	async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
		let stdout = run_tool(&self.idevice_id, ["-l"]).await?;

		let mut devices = Vec::new();
		for id in parse_udid_lines(&stdout) {
			let name = match run_tool(&self.ideviceinfo, ["-u", id.as_str(), "-k", "DeviceName"]).await {
				Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
				_ => id.to_string(),
			};
			devices.push(DeviceInfo {
				id,
				name,
				platform: Platform::Ios,
			});
		}
		Ok(devices)
	}

	async fn clear_driver_artifacts(&self, _device: &DeviceId, _platform: Platform) -> Result<()> {
		Ok(())
	}
}

/// Combines the Android and iOS bridges.
///
/// Listing succeeds if at least one enabled bridge answers; artifact cleanup is
/// routed by platform.
#[derive(Debug, Clone, Default)]
pub struct HostBridge {
	android: Option<AdbBridge>,
	ios: Option<IosBridge>,
}

impl HostBridge {
	pub fn new(android: Option<AdbBridge>, ios: Option<IosBridge>) -> Self {
		Self { android, ios }
	}

	/// Android-only bridge using `adb` from `ANDROID_HOME` or `PATH`.
	pub fn android() -> Self {
		Self::new(Some(AdbBridge::default()), None)
	}
}

#[async_trait]
impl DeviceBridge for HostBridge {
	async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
		let mut devices = Vec::new();
		let mut errors = Vec::new();

		if let Some(android) = &self.android {
			match android.list_devices().await {
				Ok(found) => devices.extend(found),
				Err(e) => errors.push(e),
			}
		}
		if let Some(ios) = &self.ios {
			match ios.list_devices().await {
				Ok(found) => devices.extend(found),
				Err(e) => errors.push(e),
			}
		}

		let enabled = usize::from(self.android.is_some()) + usize::from(self.ios.is_some());
		if enabled > 0 && errors.len() == enabled {
			let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
			return Err(Error::BridgeUnavailable(message));
		}
		for e in &errors {
			debug!(target = "msb.bridge", error = %e, "bridge skipped");
		}
		Ok(devices)
	}

	async fn clear_driver_artifacts(&self, device: &DeviceId, platform: Platform) -> Result<()> {
		match (platform, &self.android, &self.ios) {
			(Platform::Android, Some(android), _) => android.clear_driver_artifacts(device, platform).await,
			(Platform::Ios, _, Some(ios)) => ios.clear_driver_artifacts(device, platform).await,
			_ => Ok(()),
		}
	}
}

/// Parses `adb devices` output into identifiers whose state is `device`.
///
/// Offline and unauthorized entries are dropped along with the header line.
pub fn parse_adb_devices(stdout: &str) -> Vec<DeviceId> {
	stdout
		.lines()
		.skip_while(|line| !line.starts_with("List of devices"))
		.skip(1)
		.filter_map(|line| {
			let mut parts = line.split('\t');
			let id = parts.next()?.trim();
			let state = parts.next()?.trim();
			(!id.is_empty() && state == "device").then(|| DeviceId::from(id))
		})
		.collect()
}

/// Parses one-UDID-per-line output.
pub fn parse_udid_lines(stdout: &str) -> Vec<DeviceId> {
	stdout.lines().map(str::trim).filter(|line| !line.is_empty()).map(DeviceId::from).collect()
}

fn default_adb_path() -> PathBuf {
	if let Ok(home) = std::env::var("ANDROID_HOME").or_else(|_| std::env::var("ANDROID_SDK_ROOT")) {
		let exe = if cfg!(windows) { "adb.exe" } else { "adb" };
		let path = PathBuf::from(home).join("platform-tools").join(exe);
		if path.exists() {
			return path;
		}
	}
	PathBuf::from("adb")
}

/// `adb uninstall` output for a package that is not on the device.
fn package_missing(message: &str) -> bool {
	message.contains("DELETE_FAILED_INTERNAL_ERROR") || message.contains("Unknown package") || message.contains("not installed for")
}

async fn run_tool<I, S>(program: &Path, args: I) -> Result<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<OsStr>,
{
	let output = Command::new(program).args(args).kill_on_drop(true).output().await.map_err(|e| {
		if e.kind() == std::io::ErrorKind::NotFound {
			Error::BridgeUnavailable(format!("{} not found", program.display()))
		} else {
			Error::Io(e)
		}
	})?;

	let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
	if output.status.success() {
		Ok(stdout)
	} else {
		let stderr = String::from_utf8_lossy(&output.stderr);
		let message = if stderr.trim().is_empty() { stdout.trim().to_string() } else { stderr.trim().to_string() };
		Err(Error::BridgeFailed {
			command: program.display().to_string(),
			message,
		})
	}
}
