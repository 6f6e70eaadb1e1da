//! Outcome type for calls whose failure is tolerated.
//!
//! Artifact cleanup, session deletion, and process termination during shutdown
//! must not abort the surrounding operation. Their results are wrapped in
//! [`BestEffort`] so the caller chooses, visibly, to log and drop the error
//! ([`BestEffort::discard`]) or to report it ([`BestEffort::into_failure`]).

use msb_protocol::DeviceId;
use tracing::warn;

#[must_use = "log the failure with `discard` or report it with `into_failure`"]
#[derive(Debug)]
pub struct BestEffort {
	action: &'static str,
	device: DeviceId,
	result: msb_runtime::Result<()>,
}

impl BestEffort {
	pub fn new(action: &'static str, device: &DeviceId, result: msb_runtime::Result<()>) -> Self {
		Self {
			action,
			device: device.clone(),
			result,
		}
	}

	pub fn is_ok(&self) -> bool {
		self.result.is_ok()
	}

	/// Logs a failure at `warn` and drops it.
	pub fn discard(self) {
		let _ = self.into_failure();
	}

	/// Logs a failure at `warn` and returns its message.
	pub fn into_failure(self) -> Option<String> {
		match self.result {
			Ok(()) => None,
			Err(e) => {
				warn!(target = "msb.broker", device = %self.device, action = self.action, error = %e, "ignored failure");
				Some(e.to_string())
			}
		}
	}
}
