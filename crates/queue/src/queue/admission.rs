//! Admission and cancellation of queued jobs.

use optimist_primitives::{Entity, FencingToken};

use super::{MutationQueue, QueuedJob, same_intent};
use crate::error::MutationError;
use crate::fencing::{Fence, PendingEntry};
use crate::handle::MutationHandle;
use crate::job::MutationJob;
use crate::store::SyncStatus;

impl<E: Entity> MutationQueue<E> {
	/// Admits `job`, applying its optimistic write before returning.
	///
	/// * A running or queued job on the same key with the same kind (and
	///   result type) absorbs the admission: its handle is returned and
	///   `job` is dropped without applying.
	/// * A queued job on the same key with a different kind is replaced:
	///   it is rolled back, rejected with [`MutationError::Replaced`], and
	///   `job` takes its place in the queue.
	/// * Otherwise `job` is appended.
	///
	/// On a closed queue the handle resolves to [`MutationError::Closed`]
	/// and nothing is applied.
	pub fn enqueue<R, C>(&self, job: MutationJob<E, R, C>) -> MutationHandle<R>
	where
		R: Clone + Send + Sync + 'static,
		C: Send + 'static,
	{
		let (handle, snapshots) = {
			let mut guard = self.shared.state.lock();
			let state = &mut *guard;

			if state.closed {
				state.stats.closed += 1;
				tracing::debug!(key = %job.key(), kind = %job.kind(), "mutation.reject_closed");
				return MutationHandle::rejected(job.kind().clone(), MutationError::Closed);
			}

			if let Some(handle) = state
				.running
				.get(job.key())
				.and_then(|running| same_intent::<R>(&*running.handle, &running.kind, job.kind()))
			{
				state.stats.deduplicated += 1;
				tracing::debug!(key = %job.key(), kind = %job.kind(), state = "running", "mutation.dedupe");
				return handle;
			}

			// `Some(prior)` when `job` inherits the slot of a replaced job.
			let mut inherited: Option<Option<Fence<E>>> = None;
			let mut index = state.queued.len();
			if let Some(position) = state.queued.iter().position(|queued| queued.key == *job.key()) {
				let queued = &state.queued[position];
				if let Some(handle) = same_intent::<R>(&*queued.handle, &queued.kind, job.kind()) {
					state.stats.deduplicated += 1;
					tracing::debug!(key = %job.key(), kind = %job.kind(), state = "queued", "mutation.dedupe");
					return handle;
				}
				if let Some(replaced) = state.queued.remove(position) {
					tracing::debug!(key = %replaced.key, kind = %replaced.kind, by = %job.kind(), token = %replaced.token, "mutation.replace");
					let error = MutationError::Replaced {
						key: replaced.key.to_string(),
						kind: replaced.kind,
						by: job.kind().clone(),
					};
					replaced.job.abort(&mut state.store, error);
					state.stats.replaced += 1;
					inherited = Some(replaced.prior);
					index = position;
				}
			}

			let token = FencingToken::mint();
			let admission = job.prepare(&mut state.store);
			state.store.set_status(&admission.key, SyncStatus::Syncing);
			let superseded = state.registry.register(
				admission.key.clone(),
				PendingEntry {
					token,
					kind: admission.kind.clone(),
					expect: admission.expect,
					owns: admission.owns,
				},
			);
			tracing::debug!(key = %admission.key, kind = %admission.kind, %token, index, "mutation.admit");

			state.queued.insert(
				index,
				QueuedJob {
					key: admission.key,
					kind: admission.kind,
					token,
					handle: Box::new(admission.handle.clone()),
					prior: inherited.unwrap_or(superseded),
					job: admission.job,
				},
			);
			state.stats.admitted += 1;

			(admission.handle, self.publish_transitions(state))
		};
		self.notify(&snapshots);
		handle
	}

	/// Removes the queued job on `key`, rolling it back and rejecting it
	/// with [`MutationError::Cancelled`].
	///
	/// Returns false when `key` has no queued job; a running job is never
	/// preempted, since its operation may already have taken effect.
	pub fn cancel_queued(&self, key: &E::Key) -> bool {
		let snapshots = {
			let mut guard = self.shared.state.lock();
			let state = &mut *guard;
			let Some(position) = state.queued.iter().position(|queued| queued.key == *key) else {
				return false;
			};
			let Some(cancelled) = state.queued.remove(position) else {
				return false;
			};

			tracing::debug!(key = %cancelled.key, kind = %cancelled.kind, token = %cancelled.token, "mutation.cancel");
			let error = MutationError::Cancelled {
				key: cancelled.key.to_string(),
				kind: cancelled.kind,
			};
			cancelled.job.abort(&mut state.store, error);
			state.registry.restore(&cancelled.key, cancelled.token, cancelled.prior);
			state.refresh_status(&cancelled.key);
			state.stats.cancelled += 1;

			[self.publish_locked(state)]
		};
		self.notify(&snapshots);
		true
	}
}
