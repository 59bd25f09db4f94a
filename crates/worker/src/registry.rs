use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::TaskClass;

/// Status snapshot for one confirmation driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRecord {
	pub name: String,
	pub class: TaskClass,
	/// Updates handed to the queue.
	pub deliveries: u64,
	/// Source failures observed.
	pub failures: u64,
	pub last_error: Option<String>,
	pub running: bool,
}

impl DriverRecord {
	fn new(name: &str, class: TaskClass) -> Self {
		Self {
			name: name.to_string(),
			class,
			deliveries: 0,
			failures: 0,
			last_error: None,
			running: true,
		}
	}
}

/// In-memory driver registry for status snapshots.
#[derive(Debug, Default, Clone)]
pub struct DriverRegistry {
	inner: Arc<RwLock<HashMap<String, DriverRecord>>>,
}

impl DriverRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a running driver, resetting any previous record under the same name.
	pub fn start(&self, name: &str, class: TaskClass) {
		self.inner.write().insert(name.to_string(), DriverRecord::new(name, class));
	}

	/// Counts one successful delivery.
	pub fn record_delivery(&self, name: &str) {
		if let Some(record) = self.inner.write().get_mut(name) {
			record.deliveries = record.deliveries.wrapping_add(1);
		}
	}

	/// Counts one source failure and remembers its message.
	pub fn record_failure(&self, name: &str, error: impl Into<String>) {
		if let Some(record) = self.inner.write().get_mut(name) {
			record.failures = record.failures.wrapping_add(1);
			record.last_error = Some(error.into());
		}
	}

	/// Marks a driver as exited.
	pub fn stop(&self, name: &str) {
		if let Some(record) = self.inner.write().get_mut(name) {
			record.running = false;
		}
	}

	/// Returns one record.
	pub fn get(&self, name: &str) -> Option<DriverRecord> {
		self.inner.read().get(name).cloned()
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<DriverRecord> {
		let mut records: Vec<_> = self.inner.read().values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}
