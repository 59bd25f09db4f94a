use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of one admitted mutation.
///
/// A fresh token is minted for every admission. Completions and external
/// confirmations are compared against the token registered for their key,
/// and anything carrying an older token is treated as superseded.
///
/// Servers that support it can echo the token back on the entity (see
/// [`crate::Entity::fencing_token`]), which lets the reconciler recognize a
/// confirmation without comparing observable state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FencingToken(Uuid);

impl FencingToken {
	/// Mints a new random token.
	pub fn mint() -> Self {
		Self(Uuid::new_v4())
	}

	/// Wraps a token received from a remote source.
	pub const fn from_uuid(id: Uuid) -> Self {
		Self(id)
	}

	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl fmt::Debug for FencingToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "FencingToken({})", self.0.simple())
	}
}

impl fmt::Display for FencingToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0.simple(), f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn minted_tokens_are_distinct() {
		let a = FencingToken::mint();
		let b = FencingToken::mint();
		assert_ne!(a, b);
	}

	#[test]
	fn serializes_as_bare_uuid() {
		let token = FencingToken::mint();
		let json = serde_json::to_string(&token).unwrap();
		assert_eq!(json, format!("\"{}\"", token.as_uuid()));

		let back: FencingToken = serde_json::from_str(&json).unwrap();
		assert_eq!(back, token);
	}
}
