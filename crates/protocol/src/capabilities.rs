//! Session capability construction.
//!
//! Capability shapes are an explicit table keyed by [`Platform`]. Both platforms
//! carry the device identifier in `appium:udid`, which the drivers treat as
//! authoritative, and mirror it into `appium:deviceName`, which older driver
//! versions still require.

use serde_json::{Map, Value};

use crate::device::{DeviceId, Platform};

/// Flat `alwaysMatch` capability set.
pub type Capabilities = Map<String, Value>;

pub const PLATFORM_NAME: &str = "platformName";
pub const AUTOMATION_NAME: &str = "appium:automationName";
pub const UDID: &str = "appium:udid";
pub const DEVICE_NAME: &str = "appium:deviceName";

/// Fixed capability values for one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
	pub platform_name: &'static str,
	pub automation_name: &'static str,
}

/// Returns the table row for `platform`.
pub const fn platform_capabilities(platform: Platform) -> PlatformCapabilities {
	match platform {
		Platform::Android => PlatformCapabilities {
			platform_name: "Android",
			automation_name: "UiAutomator2",
		},
		Platform::Ios => PlatformCapabilities {
			platform_name: "iOS",
			automation_name: "XCUITest",
		},
	}
}

/// Builds the capabilities for a session on `device`.
///
/// Keys from `extra` are merged in first, so operator-supplied values can add
/// capabilities but never replace the platform or identifier entries.
pub fn capabilities_for(platform: Platform, device: &DeviceId, extra: &Capabilities) -> Capabilities {
	let row = platform_capabilities(platform);
	let mut caps = extra.clone();
	caps.insert(PLATFORM_NAME.into(), Value::from(row.platform_name));
	caps.insert(AUTOMATION_NAME.into(), Value::from(row.automation_name));
	caps.insert(UDID.into(), Value::from(device.as_str()));
	caps.insert(DEVICE_NAME.into(), Value::from(device.as_str()));
	caps
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn android_row_uses_uiautomator2() {
		let caps = capabilities_for(Platform::Android, &"emulator-5554".into(), &Capabilities::new());
		assert_eq!(
			Value::Object(caps),
			json!({
				"platformName": "Android",
				"appium:automationName": "UiAutomator2",
				"appium:udid": "emulator-5554",
				"appium:deviceName": "emulator-5554",
			})
		);
	}

	#[test]
	fn ios_row_uses_xcuitest() {
		let caps = capabilities_for(Platform::Ios, &"00008030-001A2B3C".into(), &Capabilities::new());
		assert_eq!(caps[PLATFORM_NAME], "iOS");
		assert_eq!(caps[AUTOMATION_NAME], "XCUITest");
		assert_eq!(caps[UDID], "00008030-001A2B3C");
		assert_eq!(caps[DEVICE_NAME], "00008030-001A2B3C");
	}

	#[test]
	fn extra_capabilities_cannot_override_table_keys() {
		let extra = json!({
			"appium:newCommandTimeout": 300,
			"platformName": "Windows",
			"appium:udid": "spoofed",
		});
		let Value::Object(extra) = extra else { unreachable!() };

		let caps = capabilities_for(Platform::Android, &"emulator-5554".into(), &extra);
		assert_eq!(caps["appium:newCommandTimeout"], 300);
		assert_eq!(caps[PLATFORM_NAME], "Android");
		assert_eq!(caps[UDID], "emulator-5554");
	}
}
