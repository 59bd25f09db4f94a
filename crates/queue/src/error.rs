//! Error taxonomy for mutation jobs.
//!
//! [`RunError`] is produced by caller-supplied operations and is opaque to
//! the queue apart from its classification. [`MutationError`] is what a
//! [`crate::MutationHandle`] rejects with.

use std::fmt;

use optimist_primitives::MutationKind;
use thiserror::Error;

/// Caller-side classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
	Network,
	Server,
	Validation,
	Timeout,
	/// The operation panicked while running.
	Panicked,
	Other,
}

impl FailureClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Network => "network",
			Self::Server => "server",
			Self::Validation => "validation",
			Self::Timeout => "timeout",
			Self::Panicked => "panicked",
			Self::Other => "other",
		}
	}
}

impl fmt::Display for FailureClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Failure returned by a mutation's `run` operation.
///
/// The queue never retries; `retryable` is carried through for callers that
/// implement their own retry policy inside `run` or above the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} error: {message}")]
pub struct RunError {
	class: FailureClass,
	retryable: bool,
	message: String,
}

impl RunError {
	pub fn new(class: FailureClass, retryable: bool, message: impl Into<String>) -> Self {
		Self {
			class,
			retryable,
			message: message.into(),
		}
	}

	/// Transport-level failure; retryable.
	pub fn network(message: impl Into<String>) -> Self {
		Self::new(FailureClass::Network, true, message)
	}

	/// Server rejected or failed the request; retryable.
	pub fn server(message: impl Into<String>) -> Self {
		Self::new(FailureClass::Server, true, message)
	}

	/// Request was invalid; not retryable.
	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(FailureClass::Validation, false, message)
	}

	/// Operation exceeded its own deadline; retryable.
	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(FailureClass::Timeout, true, message)
	}

	pub(crate) fn panicked(message: impl Into<String>) -> Self {
		Self::new(FailureClass::Panicked, false, message)
	}

	pub fn class(&self) -> FailureClass {
		self.class
	}

	pub fn is_retryable(&self) -> bool {
		self.retryable
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Reason a mutation handle was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
	/// A newer mutation of a different kind on the same key replaced this one while queued.
	#[error("{kind} on {key} was replaced by {by}")]
	Replaced { key: String, kind: MutationKind, by: MutationKind },

	/// The mutation was cancelled while queued.
	#[error("{kind} on {key} was cancelled")]
	Cancelled { key: String, kind: MutationKind },

	/// The supplied operation failed.
	#[error("{kind} on {key} failed: {source}")]
	RunFailed {
		key: String,
		kind: MutationKind,
		#[source]
		source: RunError,
	},

	/// The queue was closed before the mutation could run.
	#[error("mutation queue closed")]
	Closed,
}

impl MutationError {
	/// Returns the operation failure, when this is [`MutationError::RunFailed`].
	pub fn run_error(&self) -> Option<&RunError> {
		match self {
			Self::RunFailed { source, .. } => Some(source),
			_ => None,
		}
	}
}
