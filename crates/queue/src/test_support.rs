//! Fixtures shared by the queue's unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use optimist_primitives::{Entity, FencingToken};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
	Stopped,
	Starting,
	Running,
	Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineField {
	Status,
	Name,
	Cpus,
}

/// Minimal entity: a named machine with a lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
	pub id: String,
	pub name: String,
	pub status: Status,
	pub cpus: u32,
	pub last_token: Option<FencingToken>,
}

impl Machine {
	pub fn new(id: &str, status: Status) -> Self {
		Self {
			id: id.to_string(),
			name: id.to_uppercase(),
			status,
			cpus: 1,
			last_token: None,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachinePatch {
	pub name: Option<String>,
	pub status: Option<Status>,
	pub cpus: Option<u32>,
	pub token: Option<FencingToken>,
}

impl Entity for Machine {
	type Key = String;
	type State = Status;
	type Field = MachineField;
	type Patch = MachinePatch;

	fn key(&self) -> &String {
		&self.id
	}

	fn state(&self) -> Status {
		self.status
	}

	fn fencing_token(&self) -> Option<FencingToken> {
		self.last_token
	}

	fn merge_from(&mut self, incoming: &Self, keep: Option<MachineField>) {
		if keep != Some(MachineField::Name) {
			self.name = incoming.name.clone();
		}
		if keep != Some(MachineField::Status) {
			self.status = incoming.status;
		}
		if keep != Some(MachineField::Cpus) {
			self.cpus = incoming.cpus;
		}
		self.last_token = incoming.last_token;
	}

	fn patch_state(patch: &MachinePatch) -> Option<Status> {
		patch.status
	}

	fn patch_token(patch: &MachinePatch) -> Option<FencingToken> {
		patch.token
	}

	fn apply_patch(&mut self, patch: &MachinePatch, keep: Option<MachineField>) {
		if let Some(name) = &patch.name
			&& keep != Some(MachineField::Name)
		{
			self.name = name.clone();
		}
		if let Some(status) = patch.status
			&& keep != Some(MachineField::Status)
		{
			self.status = status;
		}
		if let Some(cpus) = patch.cpus
			&& keep != Some(MachineField::Cpus)
		{
			self.cpus = cpus;
		}
		if patch.token.is_some() {
			self.last_token = patch.token;
		}
	}
}

pub fn key(id: &str) -> String {
	id.to_string()
}

/// Operations that block until the test releases them, one slot per key.
///
/// A job's `run` registers its release channel when the dispatcher starts
/// it, so [`Gates::is_started`] doubles as "the dispatcher started this key".
#[derive(Clone, Default)]
pub struct Gates {
	inner: Arc<Mutex<HashMap<String, Vec<oneshot::Sender<Result<(), RunError>>>>>>,
}

impl Gates {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns a `run` operation that waits for [`Self::release`] on `id`.
	pub fn op(&self, id: &str) -> impl FnOnce() -> optimist_primitives::BoxFutureStatic<Result<(), RunError>> + Send + 'static {
		let gates = self.clone();
		let id = id.to_string();
		move || {
			let (tx, rx) = oneshot::channel();
			gates.inner.lock().entry(id).or_default().push(tx);
			Box::pin(async move { rx.await.unwrap_or_else(|_| Err(RunError::network("gate dropped"))) })
		}
	}

	pub fn is_started(&self, id: &str) -> bool {
		self.inner.lock().get(id).is_some_and(|v| !v.is_empty())
	}

	pub fn started_count(&self) -> usize {
		self.inner.lock().values().map(Vec::len).sum()
	}

	/// Resolves the oldest started operation on `id`.
	pub fn release(&self, id: &str, result: Result<(), RunError>) {
		let tx = {
			let mut inner = self.inner.lock();
			let waiting = inner.get_mut(id).expect("no operation started for key");
			assert!(!waiting.is_empty(), "no operation started for key {id}");
			waiting.remove(0)
		};
		let _ = tx.send(result);
	}
}

pub async fn wait_until<F>(name: &str, mut condition: F)
where
	F: FnMut() -> bool,
{
	timeout(Duration::from_secs(2), async move {
		loop {
			if condition() {
				return;
			}
			sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {name}"));
}
