//! Per-device mutual exclusion for session acquisition.
//!
//! Acquisition never waits: a held device answers `false` (or `None` for the
//! RAII form) and the caller reports `Busy`. Each entry is keyed independently,
//! so contention on one device never delays another.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use msb_protocol::DeviceId;

#[derive(Debug, Clone, Default)]
pub struct DeviceLockTable {
	held: Arc<DashMap<DeviceId, u64>>,
	generation: Arc<AtomicU64>,
}

impl DeviceLockTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks `device` held. Returns `false` immediately if it already is.
	pub fn try_acquire(&self, device: &DeviceId) -> bool {
		self.acquire_token(device).is_some()
	}

	/// Clears the held flag. Idempotent.
	pub fn release(&self, device: &DeviceId) {
		self.held.remove(device);
	}

	/// Scoped acquisition: the lock is released when the lease drops, on every
	/// exit path including `?` and panics.
	pub fn lease(&self, device: &DeviceId) -> Option<DeviceLease> {
		let token = self.acquire_token(device)?;
		Some(DeviceLease {
			held: Arc::clone(&self.held),
			device: device.clone(),
			token,
		})
	}

	pub fn is_held(&self, device: &DeviceId) -> bool {
		self.held.contains_key(device)
	}

	pub fn len(&self) -> usize {
		self.held.len()
	}

	pub fn is_empty(&self) -> bool {
		self.held.is_empty()
	}

	/// Drops every entry. Outstanding leases become no-ops on drop.
	pub fn clear(&self) {
		self.held.clear();
	}

	fn acquire_token(&self, device: &DeviceId) -> Option<u64> {
		match self.held.entry(device.clone()) {
			Entry::Occupied(_) => None,
			Entry::Vacant(slot) => {
				let token = self.generation.fetch_add(1, Ordering::Relaxed);
				slot.insert(token);
				Some(token)
			}
		}
	}
}

/// Held lock on one device.
#[derive(Debug)]
pub struct DeviceLease {
	held: Arc<DashMap<DeviceId, u64>>,
	device: DeviceId,
	token: u64,
}

impl DeviceLease {
	pub fn device(&self) -> &DeviceId {
		&self.device
	}
}

impl Drop for DeviceLease {
	fn drop(&mut self) {
		// Only release our own acquisition; the entry may have been cleared and
		// re-acquired by someone else since.
		self.held.remove_if(&self.device, |_, token| *token == self.token);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_acquire_fails_until_release() {
		let table = DeviceLockTable::new();
		let device = DeviceId::from("emulator-5554");

		assert!(table.try_acquire(&device));
		assert!(!table.try_acquire(&device));
		table.release(&device);
		assert!(table.try_acquire(&device));
	}

	#[test]
	fn release_is_idempotent() {
		let table = DeviceLockTable::new();
		let device = DeviceId::from("emulator-5554");
		table.release(&device);
		table.release(&device);
		assert!(table.is_empty());
	}

	#[test]
	fn devices_lock_independently() {
		let table = DeviceLockTable::new();
		let _a = table.lease(&"emulator-5554".into()).unwrap();
		assert!(table.lease(&"emulator-5556".into()).is_some());
	}

	#[test]
	fn lease_releases_on_drop() {
		let table = DeviceLockTable::new();
		let device = DeviceId::from("emulator-5554");
		{
			let lease = table.lease(&device).unwrap();
			assert_eq!(lease.device(), &device);
			assert!(table.lease(&device).is_none());
		}
		assert!(!table.is_held(&device));
	}

	#[test]
	fn lease_releases_on_early_return() {
		fn fails(table: &DeviceLockTable, device: &DeviceId) -> Result<(), &'static str> {
			let _lease = table.lease(device).ok_or("busy")?;
			Err("session create failed")
		}

		let table = DeviceLockTable::new();
		let device = DeviceId::from("emulator-5554");
		assert_eq!(fails(&table, &device), Err("session create failed"));
		assert!(table.is_empty());
	}

	#[test]
	fn stale_lease_does_not_release_newer_holder() {
		let table = DeviceLockTable::new();
		let device = DeviceId::from("emulator-5554");

		let stale = table.lease(&device).unwrap();
		table.clear();
		let _current = table.lease(&device).unwrap();
		drop(stale);

		assert!(table.is_held(&device));
	}
}
