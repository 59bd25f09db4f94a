//! The simulated collection: deployable services.

use optimist_primitives::{Entity, FencingToken};
use serde::Serialize;

/// Lifecycle state reported by the service backend.
///
/// `Starting`, `Stopping` and `Restarting` only ever exist locally, as the
/// optimistic value of a pending transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
	Stopped,
	Starting,
	Running,
	Stopping,
	Restarting,
}

/// Fields a pending mutation can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceField {
	Status,
	/// Name and replica count.
	Spec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
	pub id: String,
	pub name: String,
	pub status: ServiceStatus,
	pub replicas: u32,
	/// Token of the last mutation the backend applied.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token: Option<FencingToken>,
}

impl Service {
	pub fn new(id: &str, name: &str, status: ServiceStatus, replicas: u32) -> Self {
		Self {
			id: id.to_string(),
			name: name.to_string(),
			status,
			replicas,
			token: None,
		}
	}
}

/// Partial update pushed by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePatch {
	pub name: Option<String>,
	pub replicas: Option<u32>,
	pub status: Option<ServiceStatus>,
	pub token: Option<FencingToken>,
}

impl ServicePatch {
	/// Patch carrying every field of `service`.
	pub fn full(service: &Service) -> Self {
		Self {
			name: Some(service.name.clone()),
			replicas: Some(service.replicas),
			status: Some(service.status),
			token: service.token,
		}
	}
}

impl Entity for Service {
	type Key = String;
	type State = ServiceStatus;
	type Field = ServiceField;
	type Patch = ServicePatch;

	fn key(&self) -> &String {
		&self.id
	}

	fn state(&self) -> ServiceStatus {
		self.status
	}

	fn fencing_token(&self) -> Option<FencingToken> {
		self.token
	}

	fn merge_from(&mut self, incoming: &Self, keep: Option<ServiceField>) {
		if keep != Some(ServiceField::Status) {
			self.status = incoming.status;
		}
		if keep != Some(ServiceField::Spec) {
			self.name.clone_from(&incoming.name);
			self.replicas = incoming.replicas;
		}
		self.token = incoming.token;
	}

	fn patch_state(patch: &ServicePatch) -> Option<ServiceStatus> {
		patch.status
	}

	fn patch_token(patch: &ServicePatch) -> Option<FencingToken> {
		patch.token
	}

	fn apply_patch(&mut self, patch: &ServicePatch, keep: Option<ServiceField>) {
		if let Some(status) = patch.status
			&& keep != Some(ServiceField::Status)
		{
			self.status = status;
		}
		if keep != Some(ServiceField::Spec) {
			if let Some(name) = &patch.name {
				self.name.clone_from(name);
			}
			if let Some(replicas) = patch.replicas {
				self.replicas = replicas;
			}
		}
		if patch.token.is_some() {
			self.token = patch.token;
		}
	}
}
