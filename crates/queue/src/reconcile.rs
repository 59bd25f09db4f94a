//! Merge of externally delivered updates into the optimistic store.
//!
//! Every update, whichever source delivered it, goes through [`merge`]:
//!
//! * No pending entry for the key: the server wins outright.
//! * Pending entry, and the update carries its token or its expected
//!   terminal state: confirmation. The entry is retired, all fields are
//!   adopted and the record stops syncing.
//! * Pending entry otherwise: the update predates or races the mutation.
//!   Fields other than the owned one are merged; the owned field keeps its
//!   optimistic value and the record keeps syncing.
//!
//! Absence is handled the same way: a snapshot omitting a key, or a removal
//! event, drops unprotected records, confirms pending deletes and puts
//! records with any other pending mutation into
//! [`SyncStatus::Conflict`]. Placeholders for unconfirmed creations are
//! never dropped by absence.

use std::collections::HashSet;

use optimist_primitives::{Entity, Update};

use crate::fencing::PendingRegistry;
use crate::store::{Collection, ConflictKind, SyncStatus};

/// Per-key outcome of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport<K> {
	/// Written without any pending mutation to protect.
	pub adopted: Vec<K>,
	/// Retired a pending entry.
	pub confirmed: Vec<K>,
	/// Owned field kept against a non-confirming update.
	pub suppressed: Vec<K>,
	/// Removed locally because the server no longer has them.
	pub dropped: Vec<K>,
	/// Missing upstream while a non-delete mutation is pending.
	pub conflicts: Vec<K>,
	/// Patches for keys with no local record and nothing pending.
	pub ignored: Vec<K>,
}

impl<K> Default for MergeReport<K> {
	fn default() -> Self {
		Self {
			adopted: Vec::new(),
			confirmed: Vec::new(),
			suppressed: Vec::new(),
			dropped: Vec::new(),
			conflicts: Vec::new(),
			ignored: Vec::new(),
		}
	}
}

impl<K> MergeReport<K> {
	/// True when the merge wrote nothing.
	pub fn is_noop(&self) -> bool {
		self.adopted.is_empty() && self.confirmed.is_empty() && self.suppressed.is_empty() && self.dropped.is_empty() && self.conflicts.is_empty()
	}
}

/// Merges one update. Must run inside the queue's critical section.
pub(crate) fn merge<E: Entity>(store: &mut Collection<E>, registry: &mut PendingRegistry<E>, update: Update<E>) -> MergeReport<E::Key> {
	let mut report = MergeReport::default();
	match update {
		Update::Snapshot(entities) => merge_snapshot(store, registry, entities, &mut report),
		Update::Patch { key, patch } => merge_patch(store, registry, key, &patch, &mut report),
		Update::Removed { key } => merge_absent(store, registry, key, &mut report),
	}
	report
}

fn merge_snapshot<E: Entity>(store: &mut Collection<E>, registry: &mut PendingRegistry<E>, entities: Vec<E>, report: &mut MergeReport<E::Key>) {
	let mut seen = HashSet::with_capacity(entities.len());
	for incoming in entities {
		seen.insert(incoming.key().clone());
		merge_entity(store, registry, incoming, report);
	}

	let missing: Vec<E::Key> = store.keys().chain(registry.pending_keys()).filter(|key| !seen.contains(*key)).cloned().collect();
	let mut handled = HashSet::with_capacity(missing.len());
	for key in missing {
		if handled.insert(key.clone()) {
			merge_absent(store, registry, key, report);
		}
	}
}

fn merge_entity<E: Entity>(store: &mut Collection<E>, registry: &mut PendingRegistry<E>, incoming: E, report: &mut MergeReport<E::Key>) {
	let key = incoming.key().clone();
	let Some(entry) = registry.pending(&key) else {
		store.adopt(incoming);
		report.adopted.push(key);
		return;
	};

	let confirmed = !entry.expects_absence() && entry.is_confirmed_by(incoming.fencing_token(), Some(&incoming.state()));
	let owns = entry.owns;
	if confirmed {
		registry.confirm(&key);
		tracing::debug!(key = %key, "reconcile.confirm");
		store.adopt(incoming);
		report.confirmed.push(key);
		return;
	}

	if let (Some(record), Some(field)) = (store.record_mut(&key), owns) {
		record.entity.merge_from(&incoming, Some(field));
	}
	store.resume(&key);
	tracing::trace!(key = %key, "reconcile.suppress");
	report.suppressed.push(key);
}

fn merge_patch<E: Entity>(store: &mut Collection<E>, registry: &mut PendingRegistry<E>, key: E::Key, patch: &E::Patch, report: &mut MergeReport<E::Key>) {
	let Some(entry) = registry.pending(&key) else {
		match store.record_mut(&key) {
			Some(record) => {
				record.entity.apply_patch(patch, None);
				record.status = SyncStatus::Synced;
				report.adopted.push(key);
			}
			None => {
				tracing::debug!(key = %key, "reconcile.patch_unknown_key");
				report.ignored.push(key);
			}
		}
		return;
	};

	let state = E::patch_state(patch);
	let confirmed = !entry.expects_absence() && entry.is_confirmed_by(E::patch_token(patch), state.as_ref());
	let owns = entry.owns;
	if confirmed {
		registry.confirm(&key);
		tracing::debug!(key = %key, "reconcile.confirm");
		if let Some(record) = store.record_mut(&key) {
			record.entity.apply_patch(patch, None);
			record.status = SyncStatus::Synced;
		}
		report.confirmed.push(key);
		return;
	}

	if let (Some(record), Some(field)) = (store.record_mut(&key), owns) {
		record.entity.apply_patch(patch, Some(field));
	}
	store.resume(&key);
	tracing::trace!(key = %key, "reconcile.suppress");
	report.suppressed.push(key);
}

fn merge_absent<E: Entity>(store: &mut Collection<E>, registry: &mut PendingRegistry<E>, key: E::Key, report: &mut MergeReport<E::Key>) {
	if store.record(&key).is_some_and(|r| r.is_placeholder()) {
		return;
	}

	let expects_absence = match registry.pending(&key) {
		None => {
			if store.remove(&key).is_some() {
				tracing::debug!(key = %key, "reconcile.drop");
				report.dropped.push(key);
			}
			return;
		}
		Some(entry) => entry.expects_absence(),
	};

	if expects_absence {
		registry.confirm(&key);
		store.remove(&key);
		tracing::debug!(key = %key, "reconcile.confirm_absent");
		report.confirmed.push(key);
		return;
	}

	if store.contains(&key) {
		tracing::warn!(key = %key, "reconcile.conflict");
		store.set_status(&key, SyncStatus::Conflict(ConflictKind::MissingUpstream));
		report.conflicts.push(key);
	}
}
