use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag naming the intent of a mutation ("start", "stop", "delete", ...).
///
/// Two admissions on the same key with the same kind are the same intent and
/// coalesce onto one job; different kinds on the same key are serialized and
/// a queued one is replaced by a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationKind(Cow<'static, str>);

impl MutationKind {
	pub const CREATE: Self = Self::from_static("create");
	pub const START: Self = Self::from_static("start");
	pub const STOP: Self = Self::from_static("stop");
	pub const RESTART: Self = Self::from_static("restart");
	pub const UPDATE: Self = Self::from_static("update");
	pub const DELETE: Self = Self::from_static("delete");

	pub const fn from_static(tag: &'static str) -> Self {
		Self(Cow::Borrowed(tag))
	}

	pub fn new(tag: impl Into<String>) -> Self {
		Self(Cow::Owned(tag.into()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for MutationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&'static str> for MutationKind {
	fn from(tag: &'static str) -> Self {
		Self::from_static(tag)
	}
}

impl From<String> for MutationKind {
	fn from(tag: String) -> Self {
		Self::new(tag)
	}
}
