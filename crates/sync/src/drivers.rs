use std::sync::Arc;

use optimist_config::OptimistConfig;
use optimist_primitives::Entity;
use optimist_queue::MutationQueue;
use optimist_worker::{DriverRegistry, join_error_panic_message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{PollDriver, PollSource, PushDriver, PushSource};

/// Running confirmation drivers for one queue.
///
/// Dropping the handle cancels the drivers without waiting for them; call
/// [`SyncDrivers::shutdown`] to wait until they have exited.
#[must_use = "dropping SyncDrivers stops the drivers"]
pub struct SyncDrivers {
	cancel: CancellationToken,
	tasks: Vec<(&'static str, JoinHandle<()>)>,
	registry: DriverRegistry,
}

impl SyncDrivers {
	/// Starts the drivers that are both supplied and enabled in `config`.
	pub fn start<E: Entity>(
		queue: &MutationQueue<E>,
		poll: Option<Arc<dyn PollSource<E>>>,
		push: Option<Box<dyn PushSource<E>>>,
		config: &OptimistConfig,
	) -> Self {
		let cancel = CancellationToken::new();
		let registry = DriverRegistry::new();
		let mut tasks = Vec::new();

		match poll {
			Some(source) if config.poll.enabled => {
				let task = PollDriver::spawn(queue.clone(), source, config.poll.interval(), cancel.child_token(), registry.clone());
				tasks.push((PollDriver::NAME, task));
			}
			Some(_) => tracing::debug!("poll.disabled"),
			None => {}
		}
		match push {
			Some(source) if config.push.enabled => {
				let task = PushDriver::spawn(queue.clone(), source, cancel.child_token(), registry.clone());
				tasks.push((PushDriver::NAME, task));
			}
			Some(_) => tracing::debug!("push.disabled"),
			None => {}
		}

		tracing::info!(drivers = tasks.len(), "sync.start");
		Self { cancel, tasks, registry }
	}

	/// Driver status records.
	pub fn registry(&self) -> &DriverRegistry {
		&self.registry
	}

	/// Names of the drivers that were started.
	pub fn names(&self) -> Vec<&'static str> {
		self.tasks.iter().map(|(name, _)| *name).collect()
	}

	/// Cancels every driver and waits for them to exit.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();
		for (name, task) in std::mem::take(&mut self.tasks) {
			if let Err(err) = task.await
				&& let Some(message) = join_error_panic_message(err)
			{
				tracing::error!(driver = name, panic = %message, "sync.driver_panicked");
			}
		}
		tracing::info!("sync.stop");
	}
}

impl Drop for SyncDrivers {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}
