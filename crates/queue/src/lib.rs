//! Per-key serialized optimistic mutation queue.
//!
//! A [`MutationQueue`] owns one collection of entities as the UI sees it.
//! Mutations are applied to that collection immediately, run against the
//! server in the background, and reconciled with whatever the server later
//! reports through polling or push:
//!
//! * [`MutationQueue::enqueue`] admits a [`MutationJob`]: one running and one
//!   queued job per key at most, duplicate intents coalesced, superseded
//!   queued intents rolled back.
//! * Completions are fenced: only the newest job on a key writes its result.
//! * [`MutationQueue::merge`] folds server updates in without clobbering
//!   fields a pending mutation owns.
//!
//! All state transitions happen inside one short critical section; nothing
//! awaits while holding it.

mod error;
mod fencing;
mod handle;
mod job;
mod queue;
mod reconcile;
mod store;
mod subscribe;

pub use error::{FailureClass, MutationError, RunError};
pub use fencing::{PendingEntry, PendingRegistry};
pub use handle::{JobState, MutationHandle};
pub use job::MutationJob;
pub use optimist_primitives::{Entity, FencingToken, MutationKind, QueueSnapshot, TerminalState, Update};
pub use queue::{JobInfo, KeyJobs, MutationQueue, QueueStats};
pub use reconcile::MergeReport;
pub use store::{Collection, ConflictKind, Origin, Record, SyncStatus};
pub use subscribe::Subscription;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_support;
