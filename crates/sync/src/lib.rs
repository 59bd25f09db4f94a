//! Confirmation drivers for [`optimist_queue::MutationQueue`].
//!
//! Two independent sources confirm (or contradict) optimistic state:
//!
//! * [`PollDriver`] fetches the full collection at a fixed interval from a
//!   [`PollSource`] and merges it as a snapshot.
//! * [`PushDriver`] drains a [`PushSource`] of per-entity patches and
//!   removals.
//!
//! [`SyncDrivers`] starts whichever of the two are configured and stops them
//! together.

mod drivers;
mod error;
mod poll;
mod push;

pub use drivers::SyncDrivers;
pub use error::SourceError;
pub use poll::{PollDriver, PollSource, poll_once};
pub use push::{PushDriver, PushMessage, PushSource, push_channel};
