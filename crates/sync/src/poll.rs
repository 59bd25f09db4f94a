//! Level-triggered confirmation: fetch the whole collection on a timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use optimist_primitives::Entity;
use optimist_queue::{MergeReport, MutationQueue};
use optimist_worker::{DriverRegistry, TaskClass};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::SourceError;

/// Source of full collection snapshots.
#[async_trait]
pub trait PollSource<E: Entity>: Send + Sync + 'static {
	/// Returns every entity the server currently knows.
	async fn fetch(&self) -> Result<Vec<E>, SourceError>;
}

/// Fetches once and merges the result. Failures leave the store untouched.
pub async fn poll_once<E: Entity>(queue: &MutationQueue<E>, source: &dyn PollSource<E>) -> Result<MergeReport<E::Key>, SourceError> {
	let entities = source.fetch().await?;
	Ok(queue.merge_snapshot(entities))
}

/// Periodic poll task.
pub struct PollDriver;

impl PollDriver {
	pub const NAME: &'static str = "poll";

	/// Spawns the poll loop. The first fetch happens immediately; missed ticks are skipped.
	pub fn spawn<E: Entity>(
		queue: MutationQueue<E>,
		source: Arc<dyn PollSource<E>>,
		interval: Duration,
		cancel: CancellationToken,
		registry: DriverRegistry,
	) -> JoinHandle<()> {
		registry.start(Self::NAME, TaskClass::Poll);
		optimist_worker::spawn(TaskClass::Poll, async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					_ = ticker.tick() => {}
				}

				let fetched = tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					fetched = poll_once(&queue, source.as_ref()) => fetched,
				};
				match fetched {
					Ok(report) => {
						registry.record_delivery(Self::NAME);
						tracing::debug!(
							confirmed = report.confirmed.len(),
							dropped = report.dropped.len(),
							conflicts = report.conflicts.len(),
							"poll.tick"
						);
					}
					Err(err) => {
						registry.record_failure(Self::NAME, err.to_string());
						tracing::warn!(error = %err, "poll.fetch_failed");
					}
				}
			}
			registry.stop(Self::NAME);
			tracing::debug!("poll.stop");
		})
	}
}
