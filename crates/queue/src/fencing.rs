//! Pending registry: per-key fencing state for the latest admitted mutation.
//!
//! Each key maps to the entry of its most recently admitted live job. The
//! entry plays two roles with separate lifetimes:
//!
//! * As a **pending entry** it tells the reconciler which local intent to
//!   protect. A matching confirmation retires this role.
//! * As a **fence** it tells completion handlers whether their job is still
//!   the newest one for the key. Only the job's own settlement (or its
//!   supersession) retires this role.
//!
//! Keeping both in one slot means a confirmation that races ahead of the
//! operation's own response does not turn that response into a stale one.

use std::collections::HashMap;

use optimist_primitives::{Entity, FencingToken, MutationKind, TerminalState};

/// What the registry knows about the latest admitted mutation on a key.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry<E: Entity> {
	pub token: FencingToken,
	pub kind: MutationKind,
	/// State the server reports once this mutation took effect.
	pub expect: Option<TerminalState<E::State>>,
	/// Field this mutation owns while unconfirmed. `None` owns the whole entity.
	pub owns: Option<E::Field>,
}

impl<E: Entity> PendingEntry<E> {
	/// True when `incoming` confirms this mutation, by echoed token or by observable state.
	pub(crate) fn is_confirmed_by(&self, token: Option<FencingToken>, state: Option<&E::State>) -> bool {
		if token == Some(self.token) {
			return true;
		}
		// No state here means "not reported"; absence is judged separately.
		state.is_some() && self.expect.as_ref().is_some_and(|expect| expect.is_met_by(state))
	}

	/// True when an entity disappearing from the server confirms this mutation.
	pub(crate) fn expects_absence(&self) -> bool {
		self.expect.as_ref().is_some_and(|expect| expect.is_met_by(None))
	}
}

/// Registry slot as handed back by [`PendingRegistry::register`], used to
/// restore the previous owner when a queued job is cancelled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fence<E: Entity> {
	entry: PendingEntry<E>,
	confirmed: bool,
}

impl<E: Entity> Fence<E> {
	pub(crate) fn token(&self) -> FencingToken {
		self.entry.token
	}
}

/// Per-key fencing registry owned by one queue.
#[derive(Debug)]
pub struct PendingRegistry<E: Entity> {
	fences: HashMap<E::Key, Fence<E>>,
}

impl<E: Entity> Default for PendingRegistry<E> {
	fn default() -> Self {
		Self { fences: HashMap::new() }
	}
}

impl<E: Entity> PendingRegistry<E> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a new admission on `key`, returning the slot it supersedes.
	pub(crate) fn register(&mut self, key: E::Key, entry: PendingEntry<E>) -> Option<Fence<E>> {
		self.fences.insert(key, Fence { entry, confirmed: false })
	}

	/// Unconfirmed pending entry for `key`, if any.
	pub fn pending(&self, key: &E::Key) -> Option<&PendingEntry<E>> {
		self.fences.get(key).filter(|f| !f.confirmed).map(|f| &f.entry)
	}

	/// Token of the newest live job on `key`, confirmed or not.
	pub fn current_token(&self, key: &E::Key) -> Option<FencingToken> {
		self.fences.get(key).map(|f| f.entry.token)
	}

	pub fn is_current(&self, key: &E::Key, token: FencingToken) -> bool {
		self.current_token(key) == Some(token)
	}

	/// Retires the fence for `key` if `token` still owns it.
	pub fn clear_if_current(&mut self, key: &E::Key, token: FencingToken) -> bool {
		if !self.is_current(key, token) {
			return false;
		}
		self.fences.remove(key);
		true
	}

	/// Marks the pending entry as confirmed by an external source.
	///
	/// The fence stays so the job's own completion still commits.
	pub(crate) fn confirm(&mut self, key: &E::Key) -> Option<FencingToken> {
		let fence = self.fences.get_mut(key).filter(|f| !f.confirmed)?;
		fence.confirmed = true;
		Some(fence.entry.token)
	}

	/// Reinstates `previous` after the job holding `token` left the queue without running.
	pub(crate) fn restore(&mut self, key: &E::Key, token: FencingToken, previous: Option<Fence<E>>) {
		if !self.is_current(key, token) {
			return;
		}
		match previous {
			Some(fence) => {
				self.fences.insert(key.clone(), fence);
			}
			None => {
				self.fences.remove(key);
			}
		}
	}

	/// Keys with an unconfirmed pending entry, in no particular order.
	pub(crate) fn pending_keys(&self) -> impl Iterator<Item = &E::Key> {
		self.fences.iter().filter(|(_, f)| !f.confirmed).map(|(key, _)| key)
	}

	/// Number of keys with an unconfirmed pending entry.
	pub fn pending_len(&self) -> usize {
		self.fences.values().filter(|f| !f.confirmed).count()
	}

	/// Number of keys holding a fence.
	pub fn len(&self) -> usize {
		self.fences.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fences.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{Machine, MachineField, Status};

	fn entry(kind: MutationKind, expect: Option<Status>) -> PendingEntry<Machine> {
		PendingEntry {
			token: FencingToken::mint(),
			kind,
			expect: expect.map(TerminalState::State),
			owns: Some(MachineField::Status),
		}
	}

	#[test]
	fn register_replaces_prior_entry() {
		let mut registry = PendingRegistry::<Machine>::new();
		let key = "m1".to_string();
		let first = entry(MutationKind::START, Some(Status::Running));
		let second = entry(MutationKind::STOP, Some(Status::Stopped));

		assert!(registry.register(key.clone(), first.clone()).is_none());
		let previous = registry.register(key.clone(), second.clone());
		assert_eq!(previous.map(|f| f.entry.token), Some(first.token));

		assert!(registry.is_current(&key, second.token));
		assert!(!registry.is_current(&key, first.token));
		assert_eq!(registry.pending(&key).map(|e| e.token), Some(second.token));
	}

	#[test]
	fn clear_if_current_ignores_superseded_tokens() {
		let mut registry = PendingRegistry::<Machine>::new();
		let key = "m1".to_string();
		let first = entry(MutationKind::START, None);
		let second = entry(MutationKind::STOP, None);
		registry.register(key.clone(), first.clone());
		registry.register(key.clone(), second.clone());

		assert!(!registry.clear_if_current(&key, first.token));
		assert_eq!(registry.len(), 1);
		assert!(registry.clear_if_current(&key, second.token));
		assert!(registry.is_empty());
	}

	#[test]
	fn confirmation_hides_pending_but_keeps_fence() {
		let mut registry = PendingRegistry::<Machine>::new();
		let key = "m1".to_string();
		let e = entry(MutationKind::START, Some(Status::Running));
		registry.register(key.clone(), e.clone());

		assert_eq!(registry.confirm(&key), Some(e.token));
		assert!(registry.pending(&key).is_none());
		assert!(registry.is_current(&key, e.token));
		assert_eq!(registry.pending_len(), 0);
		assert_eq!(registry.confirm(&key), None, "second confirmation is a no-op");
	}

	#[test]
	fn restore_reinstates_previous_owner_only_for_current_token() {
		let mut registry = PendingRegistry::<Machine>::new();
		let key = "m1".to_string();
		let running = entry(MutationKind::START, None);
		let queued = entry(MutationKind::STOP, None);
		registry.register(key.clone(), running.clone());
		let previous = registry.register(key.clone(), queued.clone());

		registry.restore(&key, running.token, None);
		assert!(registry.is_current(&key, queued.token), "stale restore must not apply");

		registry.restore(&key, queued.token, previous);
		assert!(registry.is_current(&key, running.token));
	}

	#[test]
	fn confirmation_by_token_or_expected_state() {
		let e = entry(MutationKind::START, Some(Status::Running));
		assert!(e.is_confirmed_by(Some(e.token), None));
		assert!(e.is_confirmed_by(None, Some(&Status::Running)));
		assert!(!e.is_confirmed_by(None, Some(&Status::Stopped)));
		assert!(!e.is_confirmed_by(Some(FencingToken::mint()), Some(&Status::Stopped)));

		let untracked = entry(MutationKind::UPDATE, None);
		assert!(!untracked.is_confirmed_by(None, Some(&Status::Running)));
		assert!(!untracked.expects_absence());
	}

	#[test]
	fn delete_is_not_confirmed_by_a_stateless_sighting() {
		let delete = PendingEntry::<Machine> {
			token: FencingToken::mint(),
			kind: MutationKind::DELETE,
			expect: Some(TerminalState::Absent),
			owns: None,
		};
		assert!(delete.expects_absence());
		assert!(!delete.is_confirmed_by(None, None));
		assert!(!delete.is_confirmed_by(None, Some(&Status::Stopped)));
		assert!(!entry(MutationKind::START, Some(Status::Running)).expects_absence());
	}
}
