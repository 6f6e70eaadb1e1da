//! Device identifiers and discovery descriptors.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier naming a physical or virtual device.
///
/// Supplied by discovery (an `adb` serial or an iOS UDID) and used as the key
/// for every piece of per-device broker state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for DeviceId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl From<String> for DeviceId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl Borrow<str> for DeviceId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// Mobile platform a device runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
	#[default]
	Android,
	Ios,
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Platform::Android => write!(f, "android"),
			Platform::Ios => write!(f, "ios"),
		}
	}
}

/// Discovery descriptor for an attached device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
	pub id: DeviceId,
	/// Human-readable name; falls back to the raw identifier.
	pub name: String,
	pub platform: Platform,
}

impl DeviceInfo {
	/// Descriptor whose display name is the identifier itself.
	pub fn unnamed(id: impl Into<DeviceId>, platform: Platform) -> Self {
		let id = id.into();
		Self {
			name: id.to_string(),
			id,
			platform,
		}
	}
}
