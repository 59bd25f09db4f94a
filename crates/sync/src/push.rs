//! Edge-triggered confirmation: per-entity messages from the server.

use async_trait::async_trait;
use optimist_primitives::{Entity, Update};
use optimist_queue::MutationQueue;
use optimist_worker::{DriverRegistry, TaskClass};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::SourceError;

/// One push message. Delivery is at-least-once and unordered across entities.
#[derive(Debug, Clone)]
pub enum PushMessage<E: Entity> {
	Patch { key: E::Key, patch: E::Patch },
	Removed { key: E::Key },
}

impl<E: Entity> PushMessage<E> {
	pub fn key(&self) -> &E::Key {
		match self {
			Self::Patch { key, .. } | Self::Removed { key } => key,
		}
	}

	pub fn into_update(self) -> Update<E> {
		match self {
			Self::Patch { key, patch } => Update::Patch { key, patch },
			Self::Removed { key } => Update::Removed { key },
		}
	}
}

/// Stream of push messages.
#[async_trait]
pub trait PushSource<E: Entity>: Send + 'static {
	/// Next message, `Some(Err(..))` for a recoverable source error, `None` once closed.
	async fn next(&mut self) -> Option<Result<PushMessage<E>, SourceError>>;
}

#[async_trait]
impl<E: Entity> PushSource<E> for mpsc::Receiver<PushMessage<E>> {
	async fn next(&mut self) -> Option<Result<PushMessage<E>, SourceError>> {
		self.recv().await.map(Ok)
	}
}

/// Bounded in-process push channel; the receiver is a [`PushSource`].
pub fn push_channel<E: Entity>(buffer: usize) -> (mpsc::Sender<PushMessage<E>>, mpsc::Receiver<PushMessage<E>>) {
	mpsc::channel(buffer.max(1))
}

/// Push consumer task.
pub struct PushDriver;

impl PushDriver {
	pub const NAME: &'static str = "push";

	/// Spawns a task merging every message from `source` until it closes or `cancel` fires.
	pub fn spawn<E: Entity>(queue: MutationQueue<E>, mut source: Box<dyn PushSource<E>>, cancel: CancellationToken, registry: DriverRegistry) -> JoinHandle<()> {
		registry.start(Self::NAME, TaskClass::Push);
		optimist_worker::spawn(TaskClass::Push, async move {
			loop {
				let next = tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					next = source.next() => next,
				};
				match next {
					Some(Ok(message)) => {
						tracing::trace!(key = %message.key(), "push.recv");
						queue.merge(message.into_update());
						registry.record_delivery(Self::NAME);
					}
					Some(Err(err)) => {
						registry.record_failure(Self::NAME, err.to_string());
						tracing::warn!(error = %err, "push.source_error");
					}
					None => {
						tracing::debug!("push.closed");
						break;
					}
				}
			}
			registry.stop(Self::NAME);
		})
	}
}
