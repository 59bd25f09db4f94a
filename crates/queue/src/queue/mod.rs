//! The mutation queue: admission, dispatch, completion and reconciliation
//! behind one critical section.
//!
//! # Purpose
//!
//! * Owns the optimistic store, the pending registry, the queued jobs and the
//!   running set for one logical collection.
//! * Serializes mutations per key, bounds global concurrency, and fences
//!   completions so superseded results never reach the store.
//!
//! # Concurrency
//!
//! Every state transition takes the queue's `parking_lot::Mutex` once and
//! runs to completion without awaiting. Operations run in spawned tasks; their
//! completions re-enter the critical section from a settle task. Subscribers
//! are notified after the lock is released.
//!
//! # Invariants
//!
//! See `invariants.rs` for the full catalogue and the tests that enforce it.

mod admission;
mod dispatch;

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use optimist_config::QueueConfig;
use optimist_primitives::{Entity, FencingToken, MutationKind, QueueSnapshot, Update};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::MutationError;
use crate::fencing::{Fence, PendingEntry, PendingRegistry};
use crate::handle::{JobState, MutationHandle};
use crate::job::ErasedJob;
use crate::reconcile::{self, MergeReport};
use crate::store::{Collection, Record, SyncStatus};
use crate::subscribe::{Subscribers, Subscription};

/// Counters since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub admitted: u64,
	/// Admissions answered with an existing handle.
	pub deduplicated: u64,
	pub replaced: u64,
	pub cancelled: u64,
	/// Queued jobs rejected by [`MutationQueue::close`], plus admissions refused afterwards.
	pub closed: u64,
	pub started: u64,
	pub committed: u64,
	pub rolled_back: u64,
	/// Successful completions that were no longer current.
	pub stale_discarded: u64,
	/// Failed completions that were no longer current; no rollback ran.
	pub failed_superseded: u64,
}

/// Introspection view of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
	pub kind: MutationKind,
	pub token: FencingToken,
	pub state: JobState,
}

/// Jobs currently held for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyJobs {
	pub running: Option<JobInfo>,
	pub queued: Option<JobInfo>,
}

impl KeyJobs {
	pub fn is_empty(&self) -> bool {
		self.running.is_none() && self.queued.is_none()
	}
}

/// Admitted job waiting for its key and a concurrency slot.
struct QueuedJob<E: Entity> {
	key: E::Key,
	kind: MutationKind,
	token: FencingToken,
	/// `MutationHandle<R>` for the job's result type.
	handle: Box<dyn Any + Send + Sync>,
	/// Registry slot this job superseded, reinstated if it leaves without running.
	prior: Option<Fence<E>>,
	job: Box<dyn ErasedJob<E>>,
}

struct RunningJob {
	kind: MutationKind,
	token: FencingToken,
	handle: Box<dyn Any + Send + Sync>,
}

/// Returns a clone of `handle` when it carries the same intent.
///
/// The downcast only succeeds for the same result type, so the same kind
/// with a different result type counts as a different intent.
fn same_intent<R: 'static>(handle: &(dyn Any + Send + Sync), held: &MutationKind, kind: &MutationKind) -> Option<MutationHandle<R>> {
	if held != kind {
		return None;
	}
	handle.downcast_ref::<MutationHandle<R>>().cloned()
}

struct State<E: Entity> {
	store: Collection<E>,
	registry: PendingRegistry<E>,
	queued: VecDeque<QueuedJob<E>>,
	/// Keyed by entity, in start order.
	running: IndexMap<E::Key, RunningJob>,
	stats: QueueStats,
	closed: bool,
	revision: u64,
}

impl<E: Entity> State<E> {
	fn snapshot(&self) -> QueueSnapshot<E::Key> {
		let mut pending_keys: Vec<E::Key> = self.running.keys().cloned().collect();
		for job in &self.queued {
			if !self.running.contains_key(&job.key) {
				pending_keys.push(job.key.clone());
			}
		}
		QueueSnapshot {
			revision: self.revision,
			running_count: self.running.len(),
			queued_count: self.queued.len(),
			total_pending: self.running.len() + self.queued.len(),
			pending_keys,
		}
	}

	/// Marks `key` after its registry slot changed outside a completion.
	fn refresh_status(&mut self, key: &E::Key) {
		if self.registry.current_token(key).is_some() {
			self.store.set_status(key, SyncStatus::Syncing);
		} else {
			self.store.settle(key);
		}
	}
}

struct Shared<E: Entity> {
	state: Mutex<State<E>>,
	ceiling: usize,
	snapshot_tx: watch::Sender<QueueSnapshot<E::Key>>,
	store_tx: watch::Sender<u64>,
	subscribers: Subscribers<E::Key>,
}

/// Per-key serialized optimistic mutation queue for one collection of `E`.
///
/// Cheap to clone; clones share the same queue. In-flight jobs keep the
/// queue alive until they settle.
pub struct MutationQueue<E: Entity> {
	shared: Arc<Shared<E>>,
}

impl<E: Entity> Clone for MutationQueue<E> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<E: Entity> std::fmt::Debug for MutationQueue<E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MutationQueue")
			.field("ceiling", &self.shared.ceiling)
			.field("snapshot", &*self.shared.snapshot_tx.borrow())
			.finish()
	}
}

impl<E: Entity> MutationQueue<E> {
	/// Creates an empty queue.
	pub fn new(config: &QueueConfig) -> Self {
		Self::with_entities(config, Vec::new())
	}

	/// Creates a queue whose store starts with `entities`, all confirmed.
	pub fn with_entities(config: &QueueConfig, entities: impl IntoIterator<Item = E>) -> Self {
		let ceiling = config.concurrency.max(1);
		let store = Collection::from_entities(entities);
		let (store_tx, _) = watch::channel(store.revision());
		let (snapshot_tx, _) = watch::channel(QueueSnapshot::default());
		Self {
			shared: Arc::new(Shared {
				state: Mutex::new(State {
					store,
					registry: PendingRegistry::new(),
					queued: VecDeque::new(),
					running: IndexMap::new(),
					stats: QueueStats::default(),
					closed: false,
					revision: 0,
				}),
				ceiling,
				snapshot_tx,
				store_tx,
				subscribers: Subscribers::new(),
			}),
		}
	}

	/// Maximum number of concurrently running jobs.
	pub fn ceiling(&self) -> usize {
		self.shared.ceiling
	}

	/// Merges one externally delivered update into the store.
	pub fn merge(&self, update: Update<E>) -> MergeReport<E::Key> {
		let source = update.source_name();
		let mut guard = self.shared.state.lock();
		let state = &mut *guard;
		let report = reconcile::merge(&mut state.store, &mut state.registry, update);
		tracing::trace!(
			source,
			adopted = report.adopted.len(),
			confirmed = report.confirmed.len(),
			suppressed = report.suppressed.len(),
			dropped = report.dropped.len(),
			conflicts = report.conflicts.len(),
			"reconcile.merge"
		);
		self.publish_store(state);
		report
	}

	/// Merges a full collection from the poll source.
	pub fn merge_snapshot(&self, entities: Vec<E>) -> MergeReport<E::Key> {
		self.merge(Update::Snapshot(entities))
	}

	/// Merges a partial update from the push channel.
	pub fn merge_patch(&self, key: E::Key, patch: E::Patch) -> MergeReport<E::Key> {
		self.merge(Update::Patch { key, patch })
	}

	/// Merges a deletion event from the push channel.
	pub fn merge_removed(&self, key: E::Key) -> MergeReport<E::Key> {
		self.merge(Update::Removed { key })
	}

	/// Registers `listener` for every published [`QueueSnapshot`].
	///
	/// A snapshot is published for every admission, start, completion,
	/// cancellation and close. Listeners run after the queue lock is
	/// released, in publish order; a snapshot older than one already
	/// delivered is skipped.
	pub fn subscribe(&self, listener: impl Fn(&QueueSnapshot<E::Key>) + Send + Sync + 'static) -> Subscription {
		self.shared.subscribers.add(listener)
	}

	/// Receiver that always holds the latest [`QueueSnapshot`].
	pub fn watch_snapshot(&self) -> watch::Receiver<QueueSnapshot<E::Key>> {
		self.shared.snapshot_tx.subscribe()
	}

	pub fn snapshot(&self) -> QueueSnapshot<E::Key> {
		self.shared.snapshot_tx.borrow().clone()
	}

	/// Receiver of the store revision, bumped whenever the store changes.
	pub fn watch_store(&self) -> watch::Receiver<u64> {
		self.shared.store_tx.subscribe()
	}

	/// Runs `f` against the store under the queue lock.
	///
	/// `f` must not call back into the queue.
	pub fn read<T>(&self, f: impl FnOnce(&Collection<E>) -> T) -> T {
		f(&self.shared.state.lock().store)
	}

	/// All records in store order.
	pub fn records(&self) -> Vec<Record<E>> {
		self.read(|store| store.iter().cloned().collect())
	}

	pub fn record(&self, key: &E::Key) -> Option<Record<E>> {
		self.read(|store| store.record(key).cloned())
	}

	pub fn get(&self, key: &E::Key) -> Option<E> {
		self.read(|store| store.get(key).cloned())
	}

	/// Keys currently held in [`SyncStatus::Conflict`].
	pub fn conflicts(&self) -> Vec<E::Key> {
		self.read(|store| {
			store
				.iter()
				.filter(|record| matches!(record.status, SyncStatus::Conflict(_)))
				.map(|record| record.entity.key().clone())
				.collect()
		})
	}

	/// Unconfirmed pending entry for `key`.
	pub fn pending(&self, key: &E::Key) -> Option<PendingEntry<E>> {
		self.shared.state.lock().registry.pending(key).cloned()
	}

	/// Token of the newest live job on `key`, confirmed or not.
	pub fn current_token(&self, key: &E::Key) -> Option<FencingToken> {
		self.shared.state.lock().registry.current_token(key)
	}

	/// Running and queued jobs for `key`.
	pub fn jobs(&self, key: &E::Key) -> KeyJobs {
		let state = self.shared.state.lock();
		KeyJobs {
			running: state.running.get(key).map(|job| JobInfo {
				kind: job.kind.clone(),
				token: job.token,
				state: JobState::Running,
			}),
			queued: state.queued.iter().find(|job| job.key == *key).map(|job| JobInfo {
				kind: job.kind.clone(),
				token: job.token,
				state: JobState::Queued,
			}),
		}
	}

	pub fn stats(&self) -> QueueStats {
		self.shared.state.lock().stats
	}

	pub fn is_closed(&self) -> bool {
		self.shared.state.lock().closed
	}

	/// Stops admitting and rejects every queued job with [`MutationError::Closed`].
	///
	/// Queued jobs are rolled back. Running jobs finish and settle normally.
	/// Admissions after this resolve to `Closed` without applying.
	pub fn close(&self) {
		let snapshots = {
			let mut guard = self.shared.state.lock();
			let state = &mut *guard;
			if state.closed {
				return;
			}
			state.closed = true;
			let drained: Vec<QueuedJob<E>> = state.queued.drain(..).collect();
			for queued in drained.into_iter().rev() {
				queued.job.abort(&mut state.store, MutationError::Closed);
				state.registry.restore(&queued.key, queued.token, queued.prior);
				state.refresh_status(&queued.key);
				state.stats.closed += 1;
			}
			tracing::debug!(running = state.running.len(), "queue.close");
			[self.publish_locked(state)]
		};
		self.notify(&snapshots);
	}

	/// Resolves once nothing is queued or running.
	pub async fn idle(&self) {
		let mut rx = self.shared.snapshot_tx.subscribe();
		let _ = rx.wait_for(QueueSnapshot::is_idle).await;
	}

	/// Recomputes and publishes the queue snapshot. Called with the lock held.
	fn publish_locked(&self, state: &mut State<E>) -> QueueSnapshot<E::Key> {
		state.revision += 1;
		let snapshot = state.snapshot();
		self.shared.snapshot_tx.send_replace(snapshot.clone());
		self.publish_store(state);
		snapshot
	}

	fn publish_store(&self, state: &State<E>) {
		let revision = state.store.revision();
		self.shared.store_tx.send_if_modified(|current| {
			if *current == revision {
				return false;
			}
			*current = revision;
			true
		});
	}

	/// Publishes the admission or completion just applied, then dispatches
	/// and publishes again if that started anything, so every start is
	/// observable on its own.
	fn publish_transitions(&self, state: &mut State<E>) -> Vec<QueueSnapshot<E::Key>> {
		let mut snapshots = vec![self.publish_locked(state)];
		if self.dispatch_locked(state) > 0 {
			snapshots.push(self.publish_locked(state));
		}
		snapshots
	}

	/// Delivers published snapshots to subscribers, oldest first. Called without the lock.
	fn notify(&self, snapshots: &[QueueSnapshot<E::Key>]) {
		for snapshot in snapshots {
			self.shared.subscribers.notify(snapshot);
		}
	}

	/// Panics unless the per-key occupancy and fencing invariants hold right now.
	#[cfg(test)]
	pub(crate) fn assert_invariants(&self) {
		use std::collections::HashSet;

		let state = self.shared.state.lock();
		assert!(state.running.len() <= self.shared.ceiling, "running {} exceeds ceiling {}", state.running.len(), self.shared.ceiling);

		let mut queued_keys = HashSet::new();
		for queued in &state.queued {
			assert!(queued_keys.insert(queued.key.clone()), "two queued jobs on {}", queued.key);
			assert_eq!(
				state.registry.current_token(&queued.key),
				Some(queued.token),
				"fence on {} is not the queued job's",
				queued.key
			);
		}
		for (key, running) in &state.running {
			if !queued_keys.contains(key) {
				assert_eq!(state.registry.current_token(key), Some(running.token), "fence on {key} is not the running job's");
			}
		}
		assert!(
			state.registry.len() <= queued_keys.len() + state.running.keys().filter(|key| !queued_keys.contains(*key)).count(),
			"fence held for a key with no live job"
		);
	}

	/// Number of keys holding a fence.
	#[cfg(test)]
	pub(crate) fn fence_count(&self) -> usize {
		self.shared.state.lock().registry.len()
	}
}
