use crate::Entity;

/// Externally delivered update, from either confirmation source.
///
/// The poll source produces [`Update::Snapshot`]; the push channel produces
/// [`Update::Patch`] and [`Update::Removed`].
#[derive(Debug, Clone)]
pub enum Update<E: Entity> {
	/// Full collection as the server currently sees it.
	Snapshot(Vec<E>),
	/// Partial update for one entity.
	Patch { key: E::Key, patch: E::Patch },
	/// The server reports the entity as deleted.
	Removed { key: E::Key },
}

impl<E: Entity> Update<E> {
	pub const fn source_name(&self) -> &'static str {
		match self {
			Self::Snapshot(_) => "snapshot",
			Self::Patch { .. } => "patch",
			Self::Removed { .. } => "removed",
		}
	}
}
