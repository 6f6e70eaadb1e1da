//! Session records, one per device, and their liveness checks.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use msb_protocol::{Capabilities, DeviceId, Platform, SessionHealth, SessionId, capabilities_for};
use msb_runtime::{DeviceBridge, SessionApi};
use tracing::{debug, info};

use crate::best_effort::BestEffort;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
	pub session_id: SessionId,
	pub device: DeviceId,
	pub created_at: u64,
}

pub struct SessionRegistry {
	api: Arc<dyn SessionApi>,
	bridge: Arc<dyn DeviceBridge>,
	create_timeout: Duration,
	extra_capabilities: Capabilities,
	records: DashMap<DeviceId, SessionRecord>,
}

impl SessionRegistry {
	pub fn new(api: Arc<dyn SessionApi>, bridge: Arc<dyn DeviceBridge>, create_timeout: Duration, extra_capabilities: Capabilities) -> Self {
		Self {
			api,
			bridge,
			create_timeout,
			extra_capabilities,
			records: DashMap::new(),
		}
	}

	/// Returns the recorded session if the server still knows it.
	///
	/// A failed probe, whether not-found or a transport error, forgets the
	/// record so the next acquisition creates a fresh session.
	pub async fn get_live_session(&self, device: &DeviceId, port: u16) -> Option<SessionId> {
		let session_id = self.records.get(device).map(|r| r.session_id.clone())?;
		match self.api.probe_session(port, &session_id).await {
			Ok(()) => {
				debug!(target = "msb.registry", device = %device, session_id = %session_id, "session alive");
				Some(session_id)
			}
			Err(e) => {
				info!(target = "msb.registry", device = %device, session_id = %session_id, error = %e, "session gone; discarding record");
				self.records.remove_if(device, |_, r| r.session_id == session_id);
				None
			}
		}
	}

	/// Creates a session on the server at `port` and records it.
	///
	/// Leftover driver artifacts are cleared first; failure there is logged
	/// and ignored. A rejected create surfaces the server's message as is.
	pub async fn create_session(&self, device: &DeviceId, platform: Platform, port: u16) -> Result<SessionId> {
		BestEffort::new("clear driver artifacts", device, self.bridge.clear_driver_artifacts(device, platform).await).discard();

		let capabilities = capabilities_for(platform, device, &self.extra_capabilities);
		let session_id = self
			.api
			.create_session(port, capabilities, self.create_timeout)
			.await
			.map_err(|e| Error::SessionCreateFailed(e.to_string()))?;

		info!(target = "msb.registry", device = %device, session_id = %session_id, port, "session created");
		self.records.insert(
			device.clone(),
			SessionRecord {
				session_id: session_id.clone(),
				device: device.clone(),
				created_at: now_ts(),
			},
		);
		Ok(session_id)
	}

	/// Forgets the session for `device` and, given a port, deletes it on the
	/// server. Returns `None` when there was no record.
	pub async fn close_session(&self, device: &DeviceId, port: Option<u16>) -> Option<BestEffort> {
		let (_, record) = self.records.remove(device)?;
		let result = match port {
			Some(port) => self.api.delete_session(port, &record.session_id).await,
			None => Ok(()),
		};
		info!(target = "msb.registry", device = %device, session_id = %record.session_id, "session closed");
		Some(BestEffort::new("delete session", device, result))
	}

	/// Drops a just-created session whose server went away under it.
	pub async fn abandon(&self, device: &DeviceId, session_id: &str, port: u16) -> BestEffort {
		self.records.remove_if(device, |_, r| r.session_id == session_id);
		let result = self.api.delete_session(port, session_id).await;
		debug!(target = "msb.registry", device = %device, session_id = %session_id, "session abandoned");
		BestEffort::new("delete session", device, result)
	}

	/// Probes the recorded session without discarding it.
	pub async fn health(&self, device: &DeviceId, port: Option<u16>) -> Option<SessionHealth> {
		let session_id = self.records.get(device).map(|r| r.session_id.clone())?;
		let alive = match port {
			Some(port) => self.api.probe_session(port, &session_id).await.is_ok(),
			None => false,
		};
		Some(SessionHealth {
			device_id: device.clone(),
			session_id,
			alive,
		})
	}

	pub fn get(&self, device: &DeviceId) -> Option<SessionRecord> {
		self.records.get(device).map(|r| r.clone())
	}

	pub fn remove(&self, device: &DeviceId) -> Option<SessionRecord> {
		self.records.remove(device).map(|(_, r)| r)
	}

	pub fn devices(&self) -> Vec<DeviceId> {
		self.records.iter().map(|r| r.key().clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn clear(&self) {
		self.records.clear();
	}
}

fn now_ts() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}
