//! Contract between the queue and the caller's entity schema.
//!
//! The queue never inspects entity payloads directly. Everything the
//! reconciler needs (identity, observable state, field-preserving merges)
//! is expressed through [`Entity`].

use std::fmt;
use std::hash::Hash;

use crate::FencingToken;

/// One member of the remote collection.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
	/// Stable per-entity identifier.
	type Key: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
	/// Observable state compared against a mutation's expected terminal state.
	type State: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
	/// Name of a field a mutation can own while it is pending.
	type Field: Copy + Eq + fmt::Debug + Send + Sync + 'static;
	/// Partial update delivered by the push channel.
	type Patch: Clone + fmt::Debug + Send + Sync + 'static;

	fn key(&self) -> &Self::Key;

	fn state(&self) -> Self::State;

	/// Token of the last mutation the server applied, when the server echoes it.
	fn fencing_token(&self) -> Option<FencingToken> {
		None
	}

	/// Copies every field from `incoming`, except `keep` when given.
	fn merge_from(&mut self, incoming: &Self, keep: Option<Self::Field>);

	/// Observable state carried by a patch, if the patch touches it.
	fn patch_state(patch: &Self::Patch) -> Option<Self::State>;

	/// Fencing token echoed in a patch, if any.
	fn patch_token(_patch: &Self::Patch) -> Option<FencingToken> {
		None
	}

	/// Applies the fields present in `patch`, except `keep` when given.
	///
	/// Must be idempotent: push delivery is at-least-once.
	fn apply_patch(&mut self, patch: &Self::Patch, keep: Option<Self::Field>);
}

/// State a pending mutation expects the server to report once it took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState<S> {
	/// The entity exists and reports this state.
	State(S),
	/// The entity no longer exists.
	Absent,
}

impl<S: PartialEq> TerminalState<S> {
	/// Returns true when `observed` (None meaning "absent") satisfies this expectation.
	pub fn is_met_by(&self, observed: Option<&S>) -> bool {
		match (self, observed) {
			(Self::State(expected), Some(observed)) => expected == observed,
			(Self::Absent, None) => true,
			_ => false,
		}
	}
}
