use std::fmt;
use std::future::IntoFuture;

use optimist_primitives::{BoxFutureStatic, MutationKind};
use tokio::sync::watch;

use crate::error::MutationError;

/// Lifecycle of an admitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
	Queued,
	Running,
	Done,
}

impl JobState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Done => "done",
		}
	}
}

#[derive(Debug, Clone)]
pub(crate) enum Progress<R> {
	Queued,
	Running,
	Done(Result<R, MutationError>),
}

impl<R> Progress<R> {
	fn state(&self) -> JobState {
		match self {
			Self::Queued => JobState::Queued,
			Self::Running => JobState::Running,
			Self::Done(_) => JobState::Done,
		}
	}

	fn is_done(&self) -> bool {
		matches!(self, Self::Done(_))
	}
}

/// Shared handle to one admitted mutation.
///
/// Clones observe the same job; duplicate admissions of the same intent hand
/// out clones of the original handle. Await it (or call [`Self::wait`]) for
/// the operation's result.
pub struct MutationHandle<R> {
	kind: MutationKind,
	rx: watch::Receiver<Progress<R>>,
}

impl<R> Clone for MutationHandle<R> {
	fn clone(&self) -> Self {
		Self {
			kind: self.kind.clone(),
			rx: self.rx.clone(),
		}
	}
}

impl<R> fmt::Debug for MutationHandle<R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MutationHandle").field("kind", &self.kind).field("state", &self.state()).finish()
	}
}

impl<R> MutationHandle<R> {
	pub fn kind(&self) -> &MutationKind {
		&self.kind
	}

	pub fn state(&self) -> JobState {
		self.rx.borrow().state()
	}

	/// Returns true when both handles observe the same job.
	pub fn same_job(&self, other: &Self) -> bool {
		self.rx.same_channel(&other.rx)
	}
}

impl<R> MutationHandle<R>
where
	R: Clone + Send + Sync + 'static,
{
	/// Handle that is already rejected; nothing was admitted.
	pub(crate) fn rejected(kind: MutationKind, error: MutationError) -> Self {
		let (_tx, rx) = watch::channel(Progress::Done(Err(error)));
		Self { kind, rx }
	}

	/// Returns the outcome if the job already settled.
	pub fn try_result(&self) -> Option<Result<R, MutationError>> {
		match &*self.rx.borrow() {
			Progress::Done(result) => Some(result.clone()),
			_ => None,
		}
	}

	/// Waits for the job to settle.
	///
	/// Resolves to [`MutationError::Closed`] if the job was dropped without
	/// settling, which only happens when its runtime shuts down underneath it.
	pub async fn wait(&self) -> Result<R, MutationError> {
		let mut rx = self.rx.clone();
		let settled = match rx.wait_for(Progress::is_done).await {
			Ok(progress) => match &*progress {
				Progress::Done(result) => result.clone(),
				_ => Err(MutationError::Closed),
			},
			Err(_) => Err(MutationError::Closed),
		};
		settled
	}
}

impl<R> IntoFuture for MutationHandle<R>
where
	R: Clone + Send + Sync + 'static,
{
	type Output = Result<R, MutationError>;
	type IntoFuture = BoxFutureStatic<Self::Output>;

	fn into_future(self) -> Self::IntoFuture {
		Box::pin(async move { self.wait().await })
	}
}

/// Producer side of a [`MutationHandle`], owned by the job.
pub(crate) struct Resolver<R> {
	tx: watch::Sender<Progress<R>>,
}

impl<R> Resolver<R>
where
	R: Clone + Send + Sync + 'static,
{
	pub(crate) fn new(kind: MutationKind) -> (Self, MutationHandle<R>) {
		let (tx, rx) = watch::channel(Progress::Queued);
		(Self { tx }, MutationHandle { kind, rx })
	}

	pub(crate) fn mark_running(&self) {
		self.tx.send_replace(Progress::Running);
	}

	pub(crate) fn resolve(self, result: Result<R, MutationError>) {
		self.tx.send_replace(Progress::Done(result));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn clones_observe_the_same_settlement() {
		let (resolver, handle) = Resolver::<u32>::new(MutationKind::START);
		let clone = handle.clone();
		assert!(handle.same_job(&clone));
		assert_eq!(handle.state(), JobState::Queued);

		resolver.mark_running();
		assert_eq!(clone.state(), JobState::Running);
		assert!(clone.try_result().is_none());

		resolver.resolve(Ok(7));
		assert_eq!(handle.wait().await, Ok(7));
		assert_eq!(clone.await, Ok(7));
	}

	#[tokio::test]
	async fn dropped_resolver_reads_as_closed() {
		let (resolver, handle) = Resolver::<()>::new(MutationKind::STOP);
		drop(resolver);
		assert_eq!(handle.wait().await, Err(MutationError::Closed));
	}

	#[tokio::test]
	async fn rejected_handle_is_done_immediately() {
		let handle = MutationHandle::<()>::rejected(MutationKind::DELETE, MutationError::Closed);
		assert_eq!(handle.state(), JobState::Done);
		assert_eq!(handle.try_result(), Some(Err(MutationError::Closed)));
	}
}
