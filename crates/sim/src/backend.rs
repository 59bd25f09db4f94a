//! In-memory stand-in for a remote service API.
//!
//! Every mutating call waits for the configured latency, may fail by
//! injection, echoes the caller's fencing token on the stored service and
//! pushes the resulting change to an attached push channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use optimist_primitives::FencingToken;
use optimist_queue::RunError;
use optimist_sync::{PollSource, PushMessage, SourceError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::service::{Service, ServicePatch, ServiceStatus};

/// Latency and failure injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
	pub latency: Duration,
	/// Fail every Nth mutating call; zero never fails.
	pub fail_every: u64,
}

#[derive(Clone)]
pub struct FakeBackend {
	inner: Arc<Inner>,
}

struct Inner {
	services: Mutex<IndexMap<String, Service>>,
	push: Mutex<Option<mpsc::Sender<PushMessage<Service>>>>,
	faults: Faults,
	calls: AtomicU64,
}

impl FakeBackend {
	pub fn new(faults: Faults, services: impl IntoIterator<Item = Service>) -> Self {
		Self {
			inner: Arc::new(Inner {
				services: Mutex::new(services.into_iter().map(|s| (s.id.clone(), s)).collect()),
				push: Mutex::new(None),
				faults,
				calls: AtomicU64::new(0),
			}),
		}
	}

	/// Routes change notifications to `sender` from now on.
	pub fn attach_push(&self, sender: mpsc::Sender<PushMessage<Service>>) {
		*self.inner.push.lock() = Some(sender);
	}

	/// Drops the push sender, closing the channel once no other sender exists.
	pub fn detach_push(&self) {
		self.inner.push.lock().take();
	}

	/// Current server-side view.
	pub fn services(&self) -> Vec<Service> {
		self.inner.services.lock().values().cloned().collect()
	}

	pub async fn create(&self, mut service: Service, token: Option<FencingToken>) -> Result<Service, RunError> {
		self.call("create").await?;
		service.status = ServiceStatus::Stopped;
		service.token = token;
		{
			let mut services = self.inner.services.lock();
			if services.contains_key(&service.id) {
				return Err(RunError::validation(format!("service {} already exists", service.id)));
			}
			services.insert(service.id.clone(), service.clone());
		}
		self.publish(PushMessage::Patch {
			key: service.id.clone(),
			patch: ServicePatch::full(&service),
		})
		.await;
		Ok(service)
	}

	pub async fn set_status(&self, id: &str, status: ServiceStatus, token: Option<FencingToken>) -> Result<Service, RunError> {
		self.modify(id, token, |service| service.status = status).await
	}

	pub async fn update(&self, id: &str, name: Option<String>, replicas: Option<u32>, token: Option<FencingToken>) -> Result<Service, RunError> {
		self.modify(id, token, |service| {
			if let Some(name) = name {
				service.name = name;
			}
			if let Some(replicas) = replicas {
				service.replicas = replicas;
			}
		})
		.await
	}

	pub async fn delete(&self, id: &str) -> Result<(), RunError> {
		self.call("delete").await?;
		if self.inner.services.lock().shift_remove(id).is_none() {
			return Err(RunError::validation(format!("no service {id}")));
		}
		self.publish(PushMessage::Removed { key: id.to_string() }).await;
		Ok(())
	}

	async fn modify(&self, id: &str, token: Option<FencingToken>, f: impl FnOnce(&mut Service)) -> Result<Service, RunError> {
		self.call("modify").await?;
		let service = {
			let mut services = self.inner.services.lock();
			let Some(service) = services.get_mut(id) else {
				return Err(RunError::validation(format!("no service {id}")));
			};
			f(service);
			service.token = token;
			service.clone()
		};
		self.publish(PushMessage::Patch {
			key: service.id.clone(),
			patch: ServicePatch::full(&service),
		})
		.await;
		Ok(service)
	}

	async fn call(&self, op: &'static str) -> Result<(), RunError> {
		if !self.inner.faults.latency.is_zero() {
			tokio::time::sleep(self.inner.faults.latency).await;
		}
		let n = self.inner.calls.fetch_add(1, Ordering::SeqCst) + 1;
		let every = self.inner.faults.fail_every;
		if every > 0 && n % every == 0 {
			tracing::debug!(op, call = n, "backend.injected_failure");
			return Err(RunError::server(format!("injected failure on call {n} ({op})")));
		}
		Ok(())
	}

	async fn publish(&self, message: PushMessage<Service>) {
		let sender = self.inner.push.lock().clone();
		if let Some(sender) = sender
			&& sender.send(message).await.is_err()
		{
			tracing::trace!("backend.push_closed");
		}
	}
}

#[async_trait]
impl PollSource<Service> for FakeBackend {
	async fn fetch(&self) -> Result<Vec<Service>, SourceError> {
		if !self.inner.faults.latency.is_zero() {
			tokio::time::sleep(self.inner.faults.latency).await;
		}
		Ok(self.services())
	}
}

#[cfg(test)]
mod tests {
	use optimist_queue::FailureClass;
	use pretty_assertions::assert_eq;

	use super::*;

	fn backend(fail_every: u64) -> FakeBackend {
		FakeBackend::new(
			Faults {
				latency: Duration::ZERO,
				fail_every,
			},
			[Service::new("api", "API", ServiceStatus::Running, 2)],
		)
	}

	#[tokio::test]
	async fn mutations_echo_the_token_and_push_the_change() {
		let backend = backend(0);
		let (tx, mut rx) = mpsc::channel(4);
		backend.attach_push(tx);
		let token = FencingToken::mint();

		let stopped = backend.set_status("api", ServiceStatus::Stopped, Some(token)).await.unwrap();
		assert_eq!(stopped.token, Some(token));

		let Some(PushMessage::Patch { key, patch }) = rx.recv().await else {
			panic!("expected a patch");
		};
		assert_eq!(key, "api");
		assert_eq!(patch.status, Some(ServiceStatus::Stopped));
		assert_eq!(patch.token, Some(token));
	}

	#[tokio::test]
	async fn every_nth_call_fails() {
		let backend = backend(2);
		assert!(backend.update("api", None, Some(3), None).await.is_ok());
		let err = backend.update("api", None, Some(4), None).await.unwrap_err();
		assert_eq!(err.class(), FailureClass::Server);
		assert_eq!(backend.services()[0].replicas, 3);
	}

	#[tokio::test]
	async fn unknown_service_is_a_validation_error() {
		let backend = backend(0);
		let err = backend.delete("ghost").await.unwrap_err();
		assert_eq!(err.class(), FailureClass::Validation);
		assert_eq!(backend.fetch().await.unwrap().len(), 1);
	}
}
