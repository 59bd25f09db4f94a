//! Core types shared by the optimistic mutation queue and its confirmation drivers.

/// Entity contract and expected terminal states.
pub mod entity;
/// Async future aliases.
pub mod future;
/// Mutation intent tags.
pub mod kind;
/// Queue occupancy snapshots.
pub mod snapshot;
/// Fencing tokens.
pub mod token;
/// Externally delivered updates.
pub mod update;

pub use entity::{Entity, TerminalState};
pub use future::BoxFutureStatic;
pub use kind::MutationKind;
pub use snapshot::QueueSnapshot;
pub use token::FencingToken;
pub use update::Update;
