//! Scripted workload against the fake backend.
//!
//! Each helper builds one [`MutationJob`] in the shape a UI would: an
//! optimistic write, the backend call, a compensating rollback, and an
//! expected terminal state so either confirmation driver can retire it.

use optimist_primitives::{BoxFutureStatic, FencingToken};
use optimist_queue::{Collection, MutationError, MutationHandle, MutationJob, MutationKind, MutationQueue, TerminalState};

use crate::backend::FakeBackend;
use crate::service::{Service, ServiceField, ServiceStatus};

/// Counts of script steps by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
	pub succeeded: usize,
	pub failed: usize,
}

struct Step {
	label: &'static str,
	outcome: BoxFutureStatic<Result<(), MutationError>>,
}

fn step<R>(label: &'static str, handle: MutationHandle<R>) -> Step
where
	R: Clone + Send + Sync + 'static,
{
	Step {
		label,
		outcome: Box::pin(async move { handle.await.map(|_| ()) }),
	}
}

/// Token of the job currently running on `key`, echoed to the backend.
fn running_token(queue: &MutationQueue<Service>, key: &String) -> Option<FencingToken> {
	queue.jobs(key).running.map(|job| job.token)
}

pub struct Scenario {
	queue: MutationQueue<Service>,
	backend: FakeBackend,
}

impl Scenario {
	pub fn new(queue: MutationQueue<Service>, backend: FakeBackend) -> Self {
		Self { queue, backend }
	}

	pub fn create(&self, id: &str, name: &str, replicas: u32) -> MutationHandle<Service> {
		let key = id.to_string();
		let (rollback_key, success_key) = (key.clone(), key.clone());
		let placeholder = Service::new(id, name, ServiceStatus::Stopped, replicas);
		let spec = placeholder.clone();
		let queue = self.queue.clone();
		let backend = self.backend.clone();

		let job = MutationJob::new(
			key.clone(),
			MutationKind::CREATE,
			move |store: &mut Collection<Service>| store.insert_placeholder(placeholder),
			move || async move {
				let token = running_token(&queue, &key);
				backend.create(spec, token).await
			},
		)
		.rollback(move |store, _err, ()| {
			store.remove(&rollback_key);
		})
		.on_success(move |store, created: &Service| store.replace(&success_key, created.clone()))
		.expect(TerminalState::State(ServiceStatus::Stopped));
		self.queue.enqueue(job)
	}

	pub fn start(&self, id: &str) -> MutationHandle<Service> {
		self.transition(id, MutationKind::START, ServiceStatus::Starting, ServiceStatus::Running)
	}

	pub fn stop(&self, id: &str) -> MutationHandle<Service> {
		self.transition(id, MutationKind::STOP, ServiceStatus::Stopping, ServiceStatus::Stopped)
	}

	pub fn restart(&self, id: &str) -> MutationHandle<Service> {
		self.transition(id, MutationKind::RESTART, ServiceStatus::Restarting, ServiceStatus::Running)
	}

	fn transition(&self, id: &str, kind: MutationKind, pending: ServiceStatus, target: ServiceStatus) -> MutationHandle<Service> {
		let key = id.to_string();
		let (apply_key, rollback_key) = (key.clone(), key.clone());
		let queue = self.queue.clone();
		let backend = self.backend.clone();

		let job = MutationJob::new(
			key.clone(),
			kind,
			move |store: &mut Collection<Service>| {
				let before = store.get(&apply_key).map(|service| service.status);
				store.update(&apply_key, |service| service.status = pending);
				before
			},
			move || async move {
				let token = running_token(&queue, &key);
				backend.set_status(&key, target, token).await
			},
		)
		.rollback(move |store, _err, before| {
			if let Some(before) = before {
				store.update(&rollback_key, |service| service.status = before);
			}
		})
		.on_success(|store, service: &Service| {
			store.insert(service.clone());
		})
		.expect(TerminalState::State(target))
		.owns(ServiceField::Status);
		self.queue.enqueue(job)
	}

	/// Changes name and/or replica count. Confirmed by token only.
	pub fn update(&self, id: &str, name: Option<&str>, replicas: Option<u32>) -> MutationHandle<Service> {
		let key = id.to_string();
		let (apply_key, rollback_key) = (key.clone(), key.clone());
		let name = name.map(str::to_string);
		let (apply_name, apply_replicas) = (name.clone(), replicas);
		let queue = self.queue.clone();
		let backend = self.backend.clone();

		let job = MutationJob::new(
			key.clone(),
			MutationKind::UPDATE,
			move |store: &mut Collection<Service>| {
				let before = store.get(&apply_key).map(|service| (service.name.clone(), service.replicas));
				store.update(&apply_key, |service| {
					if let Some(name) = apply_name {
						service.name = name;
					}
					if let Some(replicas) = apply_replicas {
						service.replicas = replicas;
					}
				});
				before
			},
			move || async move {
				let token = running_token(&queue, &key);
				backend.update(&key, name, replicas, token).await
			},
		)
		.rollback(move |store, _err, before| {
			if let Some((name, replicas)) = before {
				store.update(&rollback_key, |service| {
					service.name = name;
					service.replicas = replicas;
				});
			}
		})
		.on_success(|store, service: &Service| {
			store.insert(service.clone());
		})
		.owns(ServiceField::Spec);
		self.queue.enqueue(job)
	}

	pub fn delete(&self, id: &str) -> MutationHandle<()> {
		let key = id.to_string();
		let apply_key = key.clone();
		let backend = self.backend.clone();

		let job = MutationJob::new(
			key.clone(),
			MutationKind::DELETE,
			move |store: &mut Collection<Service>| store.remove(&apply_key),
			move || async move { backend.delete(&key).await },
		)
		.rollback(|store, _err, removed| {
			if let Some((index, service)) = removed {
				store.insert_at(index, service);
			}
		})
		.expect(TerminalState::Absent);
		self.queue.enqueue(job)
	}

	/// Runs the script and waits for every handle.
	///
	/// The first wave is admitted back to back, so later steps on a busy
	/// key exercise dedupe (same kind as the running job) and replacement
	/// (different kind than the queued job).
	pub async fn run(&self) -> ScriptOutcome {
		let first = vec![
			step("create cache", self.create("cache", "Cache", 1)),
			step("start worker", self.start("worker")),
			step("stop api", self.stop("api")),
			step("restart api", self.restart("api")),
			step("stop api again", self.stop("api")),
			step("scale worker", self.update("worker", None, Some(3))),
			step("stop worker", self.stop("worker")),
			step("delete cache", self.delete("cache")),
		];
		let outcome = await_steps(first, ScriptOutcome::default()).await;

		let second = vec![
			step("rename api", self.update("api", Some("API gateway"), None)),
			step("start ghost", self.start("ghost")),
		];
		await_steps(second, outcome).await
	}
}

async fn await_steps(steps: Vec<Step>, mut outcome: ScriptOutcome) -> ScriptOutcome {
	for Step { label, outcome: result } in steps {
		match result.await {
			Ok(()) => {
				outcome.succeeded += 1;
				tracing::info!(step = label, "sim.step_ok");
			}
			Err(err) => {
				outcome.failed += 1;
				tracing::warn!(step = label, error = %err, "sim.step_failed");
			}
		}
	}
	outcome
}
