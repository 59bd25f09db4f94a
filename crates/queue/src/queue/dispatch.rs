//! Dispatch loop and fenced completion.

use optimist_primitives::{Entity, FencingToken};
use optimist_worker::TaskClass;

use super::{MutationQueue, RunningJob, State};
use crate::job::{FinishedJob, Settlement};

impl<E: Entity> MutationQueue<E> {
	/// Starts queued jobs until the ceiling is hit or no queued job has a free key.
	///
	/// Scans in admission order, so per key jobs start in the order they were
	/// admitted. Called with the lock held after every admission and completion.
	/// Returns how many jobs were started.
	pub(super) fn dispatch_locked(&self, state: &mut State<E>) -> usize {
		let mut started = 0;
		while state.running.len() < self.shared.ceiling {
			let Some(position) = state.queued.iter().position(|queued| !state.running.contains_key(&queued.key)) else {
				break;
			};
			let Some(queued) = state.queued.remove(position) else {
				break;
			};

			tracing::debug!(
				key = %queued.key,
				kind = %queued.kind,
				token = %queued.token,
				running = state.running.len() + 1,
				"mutation.start"
			);
			state.running.insert(
				queued.key.clone(),
				RunningJob {
					kind: queued.kind,
					token: queued.token,
					handle: queued.handle,
				},
			);
			state.stats.started += 1;

			let finish = queued.job.start();
			let queue = self.clone();
			let key = queued.key;
			let token = queued.token;
			optimist_worker::spawn(TaskClass::Settle, async move {
				let finished = finish.await;
				queue.complete(key, token, finished);
			});
			started += 1;
		}
		started
	}

	/// Settles a finished job and frees its key.
	///
	/// Only the job still holding its key's fence writes to the store: its
	/// success hook runs, or its rollback when it failed. A superseded job
	/// resolves its handle without touching the store.
	fn complete(&self, key: E::Key, token: FencingToken, finished: Box<dyn FinishedJob<E>>) {
		let snapshots = {
			let mut guard = self.shared.state.lock();
			let state = &mut *guard;
			state.running.shift_remove(&key);

			let current = state.registry.is_current(&key, token);
			if let Some(failure) = finished.failure() {
				tracing::debug!(key = %key, %token, current, class = %failure.class(), error = %failure, "mutation.failed");
			}
			let settlement = finished.settle(&mut state.store, current);
			if current {
				state.registry.clear_if_current(&key, token);
				state.store.settle(&key);
			} else {
				forget_prior(state, &key, token);
			}

			match settlement {
				Settlement::Committed => {
					state.stats.committed += 1;
					tracing::debug!(key = %key, %token, "mutation.commit");
				}
				Settlement::RolledBack => {
					state.stats.rolled_back += 1;
					tracing::debug!(key = %key, %token, "mutation.rollback");
				}
				Settlement::StaleDiscarded => {
					state.stats.stale_discarded += 1;
					tracing::debug!(key = %key, %token, "mutation.stale_discard");
				}
				Settlement::FailedSuperseded => {
					state.stats.failed_superseded += 1;
					tracing::debug!(key = %key, %token, "mutation.failed_superseded");
				}
			}

			self.publish_transitions(state)
		};
		self.notify(&snapshots);
	}
}

/// Drops the settled job's fence from the queued job that superseded it.
///
/// The queued job would otherwise reinstate a fence nobody can clear if it
/// is cancelled.
fn forget_prior<E: Entity>(state: &mut State<E>, key: &E::Key, token: FencingToken) {
	for queued in state.queued.iter_mut().filter(|queued| queued.key == *key) {
		if queued.prior.as_ref().is_some_and(|prior| prior.token() == token) {
			queued.prior = None;
		}
	}
}
