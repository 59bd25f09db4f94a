//! Change listeners for queue snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use optimist_primitives::QueueSnapshot;
use parking_lot::Mutex;

type Listener<K> = Arc<dyn Fn(&QueueSnapshot<K>) + Send + Sync>;

struct Inner<K> {
	listeners: Mutex<BTreeMap<u64, Listener<K>>>,
	next_id: AtomicU64,
	/// Highest revision handed to listeners so far.
	delivered: AtomicU64,
}

/// Listener set owned by one queue.
///
/// Listeners run on whichever thread published the change, after the queue
/// lock has been released, so they may call back into the queue. Snapshots
/// published concurrently can race to this point; any snapshot older than one
/// already delivered is skipped, so listeners only ever observe increasing
/// revisions.
pub(crate) struct Subscribers<K> {
	inner: Arc<Inner<K>>,
}

impl<K: 'static> Subscribers<K> {
	pub(crate) fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				listeners: Mutex::new(BTreeMap::new()),
				next_id: AtomicU64::new(0),
				delivered: AtomicU64::new(0),
			}),
		}
	}

	pub(crate) fn add(&self, listener: impl Fn(&QueueSnapshot<K>) + Send + Sync + 'static) -> Subscription {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.listeners.lock().insert(id, Arc::new(listener));
		let weak: Weak<Inner<K>> = Arc::downgrade(&self.inner);
		Subscription {
			remove: Some(Box::new(move || {
				if let Some(inner) = weak.upgrade() {
					inner.listeners.lock().remove(&id);
				}
			})),
		}
	}

	/// Delivers `snapshot` to every listener unless a newer one was already delivered.
	pub(crate) fn notify(&self, snapshot: &QueueSnapshot<K>) {
		let previous = self.inner.delivered.fetch_max(snapshot.revision, Ordering::AcqRel);
		if previous >= snapshot.revision {
			tracing::trace!(revision = snapshot.revision, "subscribe.skip_stale");
			return;
		}
		let listeners: Vec<Listener<K>> = self.inner.listeners.lock().values().cloned().collect();
		for listener in listeners {
			listener(snapshot);
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.inner.listeners.lock().len()
	}
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
	remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	/// Removes the listener now. Equivalent to dropping the guard.
	pub fn unsubscribe(mut self) {
		self.detach();
	}

	fn detach(&mut self) {
		if let Some(remove) = self.remove.take() {
			remove();
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.detach();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription").field("active", &self.remove.is_some()).finish()
	}
}
