//! Optimistic store: the ordered collection consumers observe.
//!
//! Mutation hooks receive `&mut Collection<E>` inside the queue's critical
//! section; the reconciler writes to it through the crate-private methods.
//! Order is insertion order and is preserved across removals and reinsertions
//! so a rolled-back delete lands back at its original index.

use indexmap::IndexMap;
use optimist_primitives::Entity;

/// Why an entity is held in conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
	/// A full snapshot omitted the entity while a non-delete mutation on it was pending.
	MissingUpstream,
}

/// Synchronization status of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
	/// Value matches what the server last confirmed.
	Synced,
	/// Value carries unconfirmed local intent.
	Syncing,
	/// Local and remote views disagree in a way the queue does not resolve on its own.
	///
	/// Returns to `Syncing` when a confirmation source mentions the entity
	/// again while the mutation is still pending; confirmation then settles it.
	Conflict(ConflictKind),
}

/// Where a record's identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
	/// The server knows this entity.
	Confirmed,
	/// Local creation not yet confirmed; omitted-from-snapshot does not drop it.
	Placeholder,
}

/// One entity plus its sync bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<E> {
	pub entity: E,
	pub status: SyncStatus,
	pub origin: Origin,
}

impl<E> Record<E> {
	fn confirmed(entity: E) -> Self {
		Self {
			entity,
			status: SyncStatus::Synced,
			origin: Origin::Confirmed,
		}
	}

	pub fn is_syncing(&self) -> bool {
		self.status == SyncStatus::Syncing
	}

	pub fn is_placeholder(&self) -> bool {
		self.origin == Origin::Placeholder
	}
}

/// Ordered entity collection with per-record sync status.
#[derive(Debug, Clone)]
pub struct Collection<E: Entity> {
	records: IndexMap<E::Key, Record<E>>,
	revision: u64,
}

impl<E: Entity> Default for Collection<E> {
	fn default() -> Self {
		Self {
			records: IndexMap::new(),
			revision: 0,
		}
	}
}

impl<E: Entity> Collection<E> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a collection of confirmed entities in iteration order.
	pub fn from_entities(entities: impl IntoIterator<Item = E>) -> Self {
		let records = entities.into_iter().map(|e| (e.key().clone(), Record::confirmed(e))).collect();
		Self { records, revision: 0 }
	}

	/// Incremented on every write.
	pub fn revision(&self) -> u64 {
		self.revision
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn contains(&self, key: &E::Key) -> bool {
		self.records.contains_key(key)
	}

	pub fn get(&self, key: &E::Key) -> Option<&E> {
		self.records.get(key).map(|r| &r.entity)
	}

	pub fn record(&self, key: &E::Key) -> Option<&Record<E>> {
		self.records.get(key)
	}

	pub fn position(&self, key: &E::Key) -> Option<usize> {
		self.records.get_index_of(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Record<E>> {
		self.records.values()
	}

	pub fn keys(&self) -> impl Iterator<Item = &E::Key> {
		self.records.keys()
	}

	/// Mutable access to one entity.
	pub fn get_mut(&mut self, key: &E::Key) -> Option<&mut E> {
		let record = self.records.get_mut(key)?;
		self.revision = self.revision.wrapping_add(1);
		Some(&mut record.entity)
	}

	/// Applies `f` to one entity. Returns false when the key is unknown.
	pub fn update(&mut self, key: &E::Key, f: impl FnOnce(&mut E)) -> bool {
		match self.get_mut(key) {
			Some(entity) => {
				f(entity);
				true
			}
			None => false,
		}
	}

	/// Inserts or overwrites an entity.
	///
	/// An existing record keeps its position, status and origin. A new
	/// record is appended as confirmed and synced.
	pub fn insert(&mut self, entity: E) -> Option<E> {
		self.revision = self.revision.wrapping_add(1);
		let key = entity.key().clone();
		match self.records.get_mut(&key) {
			Some(record) => Some(std::mem::replace(&mut record.entity, entity)),
			None => {
				self.records.insert(key, Record::confirmed(entity));
				None
			}
		}
	}

	/// Appends a local creation that the server has not confirmed yet.
	pub fn insert_placeholder(&mut self, entity: E) {
		self.revision = self.revision.wrapping_add(1);
		let key = entity.key().clone();
		self.records.insert(
			key,
			Record {
				entity,
				status: SyncStatus::Synced,
				origin: Origin::Placeholder,
			},
		);
	}

	/// Inserts a confirmed entity at `index` (clamped to the length).
	///
	/// An existing record with the same key is moved to `index`.
	pub fn insert_at(&mut self, index: usize, entity: E) {
		self.revision = self.revision.wrapping_add(1);
		let key = entity.key().clone();
		self.records.shift_remove(&key);
		let index = index.min(self.records.len());
		self.records.shift_insert(index, key, Record::confirmed(entity));
	}

	/// Removes an entity, returning its former index and value.
	pub fn remove(&mut self, key: &E::Key) -> Option<(usize, E)> {
		let (index, _, record) = self.records.shift_remove_full(key)?;
		self.revision = self.revision.wrapping_add(1);
		Some((index, record.entity))
	}

	/// Replaces the record under `old` with the server's entity, in place.
	///
	/// Used when a creation placeholder is confirmed: the placeholder is
	/// swapped wholesale for the server's representation, whose key may
	/// differ. A record already present under the new key (for example one
	/// adopted from a poll that raced the creation response) is folded into
	/// the placeholder's position. Appends when `old` is unknown.
	pub fn replace(&mut self, old: &E::Key, entity: E) {
		self.revision = self.revision.wrapping_add(1);
		let key = entity.key().clone();
		let Some(index) = self.records.get_index_of(old) else {
			self.records.shift_remove(&key);
			self.records.insert(key, Record::confirmed(entity));
			return;
		};
		self.records.shift_remove_index(index);
		self.records.shift_remove(&key);
		let index = index.min(self.records.len());
		self.records.shift_insert(index, key, Record::confirmed(entity));
	}

	pub(crate) fn record_mut(&mut self, key: &E::Key) -> Option<&mut Record<E>> {
		let record = self.records.get_mut(key)?;
		self.revision = self.revision.wrapping_add(1);
		Some(record)
	}

	pub(crate) fn set_status(&mut self, key: &E::Key, status: SyncStatus) {
		if let Some(record) = self.records.get_mut(key)
			&& record.status != status
		{
			record.status = status;
			self.revision = self.revision.wrapping_add(1);
		}
	}

	/// Clears a `Syncing` mark; conflicts stay until a confirmation source resolves them.
	pub(crate) fn settle(&mut self, key: &E::Key) {
		if self.records.get(key).is_some_and(Record::is_syncing) {
			self.set_status(key, SyncStatus::Synced);
		}
	}

	/// Turns a conflict back into `Syncing` once upstream shows the entity again.
	pub(crate) fn resume(&mut self, key: &E::Key) {
		if self.records.get(key).is_some_and(|record| matches!(record.status, SyncStatus::Conflict(_))) {
			self.set_status(key, SyncStatus::Syncing);
		}
	}

	/// Overwrites (or appends) with a server-confirmed entity.
	pub(crate) fn adopt(&mut self, entity: E) {
		self.revision = self.revision.wrapping_add(1);
		let key = entity.key().clone();
		match self.records.get_mut(&key) {
			Some(record) => *record = Record::confirmed(entity),
			None => {
				self.records.insert(key, Record::confirmed(entity));
			}
		}
	}
}
