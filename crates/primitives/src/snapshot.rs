/// Derived view of queue occupancy, republished on every queue change.
///
/// Intended for "N pending" indicators; it carries no entity data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot<K> {
	/// Monotonic publish counter; later snapshots have larger revisions.
	pub revision: u64,
	pub running_count: usize,
	pub queued_count: usize,
	/// `running_count + queued_count`.
	pub total_pending: usize,
	/// Keys with a running or queued job, running keys first, each in start/admission order.
	pub pending_keys: Vec<K>,
}

impl<K> Default for QueueSnapshot<K> {
	fn default() -> Self {
		Self {
			revision: 0,
			running_count: 0,
			queued_count: 0,
			total_pending: 0,
			pending_keys: Vec::new(),
		}
	}
}

impl<K: PartialEq> QueueSnapshot<K> {
	pub fn is_idle(&self) -> bool {
		self.total_pending == 0
	}

	pub fn is_pending(&self, key: &K) -> bool {
		self.pending_keys.contains(key)
	}
}
