//! Mutation jobs: the caller-facing builder and the type-erased form the queue stores.
//!
//! A [`MutationJob`] bundles the optimistic write, the remote operation and
//! the compensation hooks for one intent. On admission it is split into a
//! handle for the caller and a boxed [`ErasedJob`] for the queue. Starting an
//! erased job produces a [`FinishedJob`] once the operation completes; the
//! queue then decides, under its lock, whether the outcome is still current.

use std::fmt;
use std::future::Future;

use optimist_primitives::{BoxFutureStatic, Entity, MutationKind, TerminalState};
use optimist_worker::{TaskClass, join_error_panic_message};

use crate::error::{FailureClass, MutationError, RunError};
use crate::handle::{MutationHandle, Resolver};
use crate::store::Collection;

type ApplyFn<E, C> = Box<dyn FnOnce(&mut Collection<E>) -> C + Send>;
type RunFn<R> = Box<dyn FnOnce() -> BoxFutureStatic<Result<R, RunError>> + Send>;
type RollbackFn<E, C> = Box<dyn FnOnce(&mut Collection<E>, &MutationError, C) + Send>;
type SuccessFn<E, R> = Box<dyn FnOnce(&mut Collection<E>, &R) + Send>;

/// One user intent against one entity.
///
/// `C` is whatever the optimistic write needs to undo itself (the previous
/// entity, its former index, ...). It is handed to `rollback` untouched.
pub struct MutationJob<E: Entity, R, C = ()> {
	key: E::Key,
	kind: MutationKind,
	apply: ApplyFn<E, C>,
	run: RunFn<R>,
	rollback: Option<RollbackFn<E, C>>,
	on_success: Option<SuccessFn<E, R>>,
	expect: Option<TerminalState<E::State>>,
	owns: Option<E::Field>,
}

impl<E, R, C> MutationJob<E, R, C>
where
	E: Entity,
	R: Clone + Send + Sync + 'static,
	C: Send + 'static,
{
	/// Creates a job from its optimistic write and its remote operation.
	///
	/// `apply` runs synchronously inside admission. `run` is called once,
	/// when the dispatcher starts the job.
	pub fn new<A, F, Fut>(key: E::Key, kind: MutationKind, apply: A, run: F) -> Self
	where
		A: FnOnce(&mut Collection<E>) -> C + Send + 'static,
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<R, RunError>> + Send + 'static,
	{
		Self {
			key,
			kind,
			apply: Box::new(apply),
			run: Box::new(move || Box::pin(run())),
			rollback: None,
			on_success: None,
			expect: None,
			owns: None,
		}
	}

	/// Compensation for the optimistic write.
	///
	/// Runs when the job is replaced or cancelled while queued, when the
	/// queue closes, or when the operation fails while the job is still the
	/// newest on its key.
	pub fn rollback(mut self, f: impl FnOnce(&mut Collection<E>, &MutationError, C) + Send + 'static) -> Self {
		self.rollback = Some(Box::new(f));
		self
	}

	/// Store write applied when the operation succeeds and the job is still current.
	pub fn on_success(mut self, f: impl FnOnce(&mut Collection<E>, &R) + Send + 'static) -> Self {
		self.on_success = Some(Box::new(f));
		self
	}

	/// State the server reports once this mutation took effect.
	pub fn expect(mut self, state: TerminalState<E::State>) -> Self {
		self.expect = Some(state);
		self
	}

	/// Field this mutation protects from non-confirming updates while pending.
	pub fn owns(mut self, field: E::Field) -> Self {
		self.owns = Some(field);
		self
	}

	pub fn key(&self) -> &E::Key {
		&self.key
	}

	pub fn kind(&self) -> &MutationKind {
		&self.kind
	}

	/// Runs the optimistic write and splits the job into its queued and caller halves.
	pub(crate) fn prepare(self, store: &mut Collection<E>) -> Admission<E, R> {
		let Self {
			key,
			kind,
			apply,
			run,
			rollback,
			on_success,
			expect,
			owns,
		} = self;

		let snapshot = apply(store);
		let (resolver, handle) = Resolver::new(kind.clone());
		let job = Prepared {
			key: key.clone(),
			kind: kind.clone(),
			snapshot,
			run,
			rollback,
			on_success,
			resolver,
		};
		Admission {
			key,
			kind,
			expect,
			owns,
			job: Box::new(job),
			handle,
		}
	}
}

impl<E: Entity, R, C> fmt::Debug for MutationJob<E, R, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MutationJob")
			.field("key", &self.key)
			.field("kind", &self.kind)
			.field("expect", &self.expect)
			.field("owns", &self.owns)
			.finish_non_exhaustive()
	}
}

/// A job whose optimistic write has been applied.
pub(crate) struct Admission<E: Entity, R> {
	pub key: E::Key,
	pub kind: MutationKind,
	pub expect: Option<TerminalState<E::State>>,
	pub owns: Option<E::Field>,
	pub job: Box<dyn ErasedJob<E>>,
	pub handle: MutationHandle<R>,
}

/// How a finished job left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
	/// Success on the newest job: `on_success` ran.
	Committed,
	/// Failure on the newest job: `rollback` ran.
	RolledBack,
	/// Success on a superseded job: nothing was written.
	StaleDiscarded,
	/// Failure on a superseded job: nothing was written.
	FailedSuperseded,
}

/// Queued job with its result type erased.
pub(crate) trait ErasedJob<E: Entity>: Send {
	/// Leaves the queue without running: compensates and rejects the handle.
	fn abort(self: Box<Self>, store: &mut Collection<E>, error: MutationError);

	/// Marks the handle running and returns the operation's completion.
	///
	/// The operation runs in its own task so a panic inside it surfaces as
	/// a [`FailureClass::Panicked`] failure instead of tearing down the caller.
	fn start(self: Box<Self>) -> BoxFutureStatic<Box<dyn FinishedJob<E>>>;
}

/// Completed operation waiting for the queue to settle it.
pub(crate) trait FinishedJob<E: Entity>: Send {
	/// Failure of the operation, if it failed.
	fn failure(&self) -> Option<&RunError>;

	/// Applies the outcome and resolves the handle.
	///
	/// `current` tells whether the job still holds its key's fence. Only a
	/// current job writes to the store.
	fn settle(self: Box<Self>, store: &mut Collection<E>, current: bool) -> Settlement;
}

struct Prepared<E: Entity, R, C> {
	key: E::Key,
	kind: MutationKind,
	snapshot: C,
	run: RunFn<R>,
	rollback: Option<RollbackFn<E, C>>,
	on_success: Option<SuccessFn<E, R>>,
	resolver: Resolver<R>,
}

impl<E, R, C> ErasedJob<E> for Prepared<E, R, C>
where
	E: Entity,
	R: Clone + Send + Sync + 'static,
	C: Send + 'static,
{
	fn abort(self: Box<Self>, store: &mut Collection<E>, error: MutationError) {
		let this = *self;
		if let Some(rollback) = this.rollback {
			rollback(store, &error, this.snapshot);
		}
		this.resolver.resolve(Err(error));
	}

	fn start(self: Box<Self>) -> BoxFutureStatic<Box<dyn FinishedJob<E>>> {
		let Prepared {
			key,
			kind,
			snapshot,
			run,
			rollback,
			on_success,
			resolver,
		} = *self;
		resolver.mark_running();

		Box::pin(async move {
			let task = optimist_worker::spawn(TaskClass::Mutation, async move { run().await });
			let outcome = match task.await {
				Ok(outcome) => outcome,
				Err(err) => Err(match join_error_panic_message(err) {
					Some(message) => RunError::panicked(message),
					None => RunError::new(FailureClass::Other, false, "operation task was cancelled"),
				}),
			};
			Box::new(Finished {
				key,
				kind,
				snapshot,
				rollback,
				on_success,
				resolver,
				outcome,
			}) as Box<dyn FinishedJob<E>>
		})
	}
}

struct Finished<E: Entity, R, C> {
	key: E::Key,
	kind: MutationKind,
	snapshot: C,
	rollback: Option<RollbackFn<E, C>>,
	on_success: Option<SuccessFn<E, R>>,
	resolver: Resolver<R>,
	outcome: Result<R, RunError>,
}

impl<E, R, C> FinishedJob<E> for Finished<E, R, C>
where
	E: Entity,
	R: Clone + Send + Sync + 'static,
	C: Send + 'static,
{
	fn failure(&self) -> Option<&RunError> {
		self.outcome.as_ref().err()
	}

	fn settle(self: Box<Self>, store: &mut Collection<E>, current: bool) -> Settlement {
		let this = *self;
		match this.outcome {
			Ok(value) => {
				let settlement = if current {
					if let Some(on_success) = this.on_success {
						on_success(store, &value);
					}
					Settlement::Committed
				} else {
					Settlement::StaleDiscarded
				};
				this.resolver.resolve(Ok(value));
				settlement
			}
			Err(source) => {
				let error = MutationError::RunFailed {
					key: this.key.to_string(),
					kind: this.kind,
					source,
				};
				let settlement = if current {
					if let Some(rollback) = this.rollback {
						rollback(store, &error, this.snapshot);
					}
					Settlement::RolledBack
				} else {
					Settlement::FailedSuperseded
				};
				this.resolver.resolve(Err(error));
				settlement
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::handle::JobState;
	use crate::test_support::{Machine, Status, key};

	fn start_job(store: &mut Collection<Machine>, outcome: Result<u32, RunError>) -> Admission<Machine, u32> {
		MutationJob::new(
			key("m1"),
			MutationKind::START,
			|store: &mut Collection<Machine>| {
				let before = store.get(&key("m1")).cloned();
				store.update(&key("m1"), |m| m.status = Status::Starting);
				before
			},
			move || async move { outcome },
		)
		.rollback(|store, _err, before| {
			if let Some(before) = before {
				store.insert(before);
			}
		})
		.on_success(|store, cpus| {
			store.update(&key("m1"), |m| {
				m.status = Status::Running;
				m.cpus = *cpus;
			});
		})
		.prepare(store)
	}

	fn store() -> Collection<Machine> {
		Collection::from_entities([Machine::new("m1", Status::Stopped)])
	}

	#[tokio::test]
	async fn prepare_applies_and_commit_runs_on_success() {
		let mut store = store();
		let admission = start_job(&mut store, Ok(4));
		assert_eq!(store.get(&key("m1")).unwrap().status, Status::Starting);
		assert_eq!(admission.handle.state(), JobState::Queued);

		let finished = admission.job.start().await;
		assert_eq!(admission.handle.state(), JobState::Running);
		assert!(finished.failure().is_none());

		assert_eq!(finished.settle(&mut store, true), Settlement::Committed);
		assert_eq!(store.get(&key("m1")).unwrap().status, Status::Running);
		assert_eq!(store.get(&key("m1")).unwrap().cpus, 4);
		assert_eq!(admission.handle.await, Ok(4));
	}

	#[tokio::test]
	async fn stale_success_resolves_without_writing() {
		let mut store = store();
		let admission = start_job(&mut store, Ok(4));
		let finished = admission.job.start().await;

		assert_eq!(finished.settle(&mut store, false), Settlement::StaleDiscarded);
		assert_eq!(store.get(&key("m1")).unwrap().status, Status::Starting);
		assert_eq!(admission.handle.await, Ok(4));
	}

	#[tokio::test]
	async fn current_failure_rolls_back() {
		let mut store = store();
		let admission = start_job(&mut store, Err(RunError::server("500")));
		let finished = admission.job.start().await;
		assert_eq!(finished.failure().map(RunError::class), Some(FailureClass::Server));

		assert_eq!(finished.settle(&mut store, true), Settlement::RolledBack);
		assert_eq!(store.get(&key("m1")).unwrap().status, Status::Stopped);
		let err = admission.handle.await.unwrap_err();
		assert_eq!(err.run_error().map(RunError::class), Some(FailureClass::Server));
	}

	#[tokio::test]
	async fn superseded_failure_skips_rollback() {
		let mut store = store();
		let admission = start_job(&mut store, Err(RunError::network("reset")));
		let finished = admission.job.start().await;

		assert_eq!(finished.settle(&mut store, false), Settlement::FailedSuperseded);
		assert_eq!(store.get(&key("m1")).unwrap().status, Status::Starting);
		assert!(admission.handle.await.is_err());
	}

	#[tokio::test]
	async fn abort_compensates_and_rejects() {
		let mut store = store();
		let admission = start_job(&mut store, Ok(1));
		let cancelled = MutationError::Cancelled {
			key: "m1".into(),
			kind: MutationKind::START,
		};

		admission.job.abort(&mut store, cancelled.clone());
		assert_eq!(store.get(&key("m1")).unwrap().status, Status::Stopped);
		assert_eq!(admission.handle.await, Err(cancelled));
	}

	fn explode() -> Result<(), RunError> {
		panic!("operation exploded")
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn panicking_operation_becomes_a_failure() {
		let mut store = store();
		let admission = MutationJob::<Machine, (), ()>::new(key("m1"), MutationKind::RESTART, |_| (), || async { explode() }).prepare(&mut store);

		let finished = admission.job.start().await;
		let failure = finished.failure().cloned().expect("panic should surface as failure");
		assert_eq!(failure.class(), FailureClass::Panicked);
		assert!(failure.message().contains("operation exploded"));
		finished.settle(&mut store, true);
		assert!(admission.handle.await.is_err());
	}
}
