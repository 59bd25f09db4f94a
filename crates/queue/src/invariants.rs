use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use optimist_config::QueueConfig;
use optimist_primitives::{MutationKind, TerminalState};
use proptest::prelude::*;

use crate::error::{MutationError, RunError};
use crate::handle::{JobState, MutationHandle};
use crate::job::MutationJob;
use crate::queue::MutationQueue;
use crate::store::{Collection, SyncStatus};
use crate::test_support::{Gates, Machine, MachineField, MachinePatch, Status, key, wait_until};

const KEYS: [&str; 3] = ["m0", "m1", "m2"];

fn machines() -> MutationQueue<Machine> {
	MutationQueue::with_entities(&QueueConfig::with_concurrency(2), KEYS.iter().map(|id| Machine::new(id, Status::Stopped)))
}

fn toggle(gates: &Gates, rollbacks: &Arc<AtomicUsize>, id: &str, start: bool) -> MutationJob<Machine, (), Option<Machine>> {
	let (kind, optimistic, terminal) = if start {
		(MutationKind::START, Status::Starting, Status::Running)
	} else {
		(MutationKind::STOP, Status::Stopping, Status::Stopped)
	};
	let apply_key = key(id);
	let success_key = key(id);
	let rollbacks = Arc::clone(rollbacks);
	MutationJob::new(
		key(id),
		kind,
		move |store: &mut Collection<Machine>| {
			let before = store.get(&apply_key).cloned();
			store.update(&apply_key, |m| m.status = optimistic);
			before
		},
		gates.op(id),
	)
	.rollback(move |store, _err, before| {
		rollbacks.fetch_add(1, Ordering::SeqCst);
		if let Some(before) = before {
			store.insert(before);
		}
	})
	.on_success(move |store, _| {
		store.update(&success_key, |m| m.status = terminal);
	})
	.expect(TerminalState::State(terminal))
	.owns(MachineField::Status)
}

/// Must keep at most one queued job per key.
///
/// * Enforced in: `MutationQueue::enqueue`
/// * Failure symptom: two intents for one entity run back to back and the older one wins.
#[tokio::test]
async fn test_one_queued_job_per_key() {
	let gates = Gates::new();
	let rollbacks = Arc::new(AtomicUsize::new(0));
	let queue = machines();

	let _m0 = queue.enqueue(toggle(&gates, &rollbacks, "m0", true));
	let _m2 = queue.enqueue(toggle(&gates, &rollbacks, "m2", true));
	let _a = queue.enqueue(toggle(&gates, &rollbacks, "m1", true));
	let _b = queue.enqueue(toggle(&gates, &rollbacks, "m1", false));
	let _c = queue.enqueue(toggle(&gates, &rollbacks, "m1", true));

	assert_eq!(queue.snapshot().queued_count, 1);
	assert_eq!(queue.stats().replaced, 2);
	queue.assert_invariants();
	queue.close();
}

/// Must never run two jobs for the same key at once.
///
/// * Enforced in: `MutationQueue::dispatch_locked`
/// * Failure symptom: a stop overtakes the start it follows and the server ends in the wrong state.
#[tokio::test]
async fn test_one_running_job_per_key() {
	let gates = Gates::new();
	let rollbacks = Arc::new(AtomicUsize::new(0));
	let queue = machines();

	let first = queue.enqueue(toggle(&gates, &rollbacks, "m1", true));
	let second = queue.enqueue(toggle(&gates, &rollbacks, "m1", false));
	wait_until("first started", || gates.is_started("m1")).await;
	assert_eq!(queue.snapshot().running_count, 1);
	assert_eq!(second.state(), JobState::Queued);

	gates.release("m1", Ok(()));
	assert_eq!(first.await, Ok(()));
	wait_until("second started", || gates.is_started("m1")).await;
	gates.release("m1", Ok(()));
	assert_eq!(second.await, Ok(()));
}

/// Must point each key's fence at its most recently admitted live job.
///
/// * Enforced in: `MutationQueue::enqueue`, `MutationQueue::cancel_queued`, `PendingRegistry::restore`
/// * Failure symptom: a superseded response commits over the newer intent, or the newer one is discarded.
#[tokio::test]
async fn test_fence_tracks_latest_admission() {
	let gates = Gates::new();
	let rollbacks = Arc::new(AtomicUsize::new(0));
	let queue = machines();

	let _running = queue.enqueue(toggle(&gates, &rollbacks, "m1", true));
	let running_token = queue.jobs(&key("m1")).running.map(|job| job.token);
	assert_eq!(queue.current_token(&key("m1")), running_token);

	let _queued = queue.enqueue(toggle(&gates, &rollbacks, "m1", false));
	let queued_token = queue.jobs(&key("m1")).queued.map(|job| job.token);
	assert_eq!(queue.current_token(&key("m1")), queued_token);

	assert!(queue.cancel_queued(&key("m1")));
	assert_eq!(queue.current_token(&key("m1")), running_token);
	queue.assert_invariants();
}

/// Must overwrite a pending key only with a confirming update.
///
/// * Enforced in: `reconcile::merge`
/// * Failure symptom: the UI flickers back to the pre-mutation value while a request is in flight.
#[tokio::test]
async fn test_non_confirming_update_keeps_optimistic_value() {
	let gates = Gates::new();
	let rollbacks = Arc::new(AtomicUsize::new(0));
	let queue = machines();
	let _running = queue.enqueue(toggle(&gates, &rollbacks, "m1", true));

	queue.merge_patch(
		key("m1"),
		MachinePatch {
			status: Some(Status::Stopped),
			name: Some("renamed".into()),
			..MachinePatch::default()
		},
	);
	let record = queue.record(&key("m1")).expect("m1 exists");
	assert_eq!(record.entity.status, Status::Starting);
	assert_eq!(record.entity.name, "renamed");
	assert_eq!(record.status, SyncStatus::Syncing);
	queue.close();
}

/// Must roll back replaced and cancelled jobs exactly once, before rejecting them.
///
/// * Enforced in: `ErasedJob::abort`
/// * Failure symptom: optimistic values of discarded intents linger in the store.
#[tokio::test]
async fn test_abort_rolls_back_exactly_once() {
	let gates = Gates::new();
	let rollbacks = Arc::new(AtomicUsize::new(0));
	let queue = machines();
	let _m0 = queue.enqueue(toggle(&gates, &rollbacks, "m0", true));
	let _m2 = queue.enqueue(toggle(&gates, &rollbacks, "m2", true));

	let replaced = queue.enqueue(toggle(&gates, &rollbacks, "m1", true));
	let cancelled = queue.enqueue(toggle(&gates, &rollbacks, "m1", false));
	assert!(queue.cancel_queued(&key("m1")));

	assert!(matches!(replaced.await, Err(MutationError::Replaced { .. })));
	assert!(matches!(cancelled.await, Err(MutationError::Cancelled { .. })));
	assert_eq!(rollbacks.load(Ordering::SeqCst), 2);
	assert_eq!(queue.get(&key("m1")).map(|m| m.status), Some(Status::Stopped));
	assert!(queue.current_token(&key("m1")).is_none());
	queue.close();
}

#[derive(Debug, Clone)]
enum Op {
	Enqueue { key: usize, start: bool },
	Cancel { key: usize },
	Release { key: usize, ok: bool },
	Confirm { key: usize, running: bool },
}

fn arb_op() -> impl Strategy<Value = Op> {
	prop_oneof![
		3 => (0..KEYS.len(), any::<bool>()).prop_map(|(key, start)| Op::Enqueue { key, start }),
		1 => (0..KEYS.len()).prop_map(|key| Op::Cancel { key }),
		3 => (0..KEYS.len(), any::<bool>()).prop_map(|(key, ok)| Op::Release { key, ok }),
		1 => (0..KEYS.len(), any::<bool>()).prop_map(|(key, running)| Op::Confirm { key, running }),
	]
}

async fn settle_tasks() {
	for _ in 0..16 {
		tokio::task::yield_now().await;
	}
}

/// Drives a random interleaving and checks the per-key invariants after every step.
async fn run_ops(ops: Vec<Op>) {
	let gates = Gates::new();
	let rollbacks = Arc::new(AtomicUsize::new(0));
	let queue = machines();
	let mut handles: Vec<MutationHandle<()>> = Vec::new();

	for op in ops {
		match op {
			Op::Enqueue { key: k, start } => handles.push(queue.enqueue(toggle(&gates, &rollbacks, KEYS[k], start))),
			Op::Cancel { key: k } => {
				queue.cancel_queued(&key(KEYS[k]));
			}
			Op::Release { key: k, ok } => {
				if gates.is_started(KEYS[k]) {
					let result = if ok { Ok(()) } else { Err(RunError::network("dropped")) };
					gates.release(KEYS[k], result);
				}
			}
			Op::Confirm { key: k, running } => {
				let status = if running { Status::Running } else { Status::Stopped };
				queue.merge_patch(
					key(KEYS[k]),
					MachinePatch {
						status: Some(status),
						..MachinePatch::default()
					},
				);
			}
		}
		settle_tasks().await;
		queue.assert_invariants();
	}

	for _ in 0..64 {
		if queue.snapshot().is_idle() {
			break;
		}
		for id in KEYS {
			if gates.is_started(id) {
				gates.release(id, Ok(()));
			}
		}
		settle_tasks().await;
		queue.assert_invariants();
	}

	assert!(queue.snapshot().is_idle(), "queue did not drain");
	assert_eq!(queue.fence_count(), 0, "fences outlived their jobs");
	assert!(handles.iter().all(|handle| handle.state() == JobState::Done));
	assert!(queue.records().iter().all(|record| record.status != SyncStatus::Syncing), "record stuck syncing");
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(64))]

	/// Must hold occupancy and fencing invariants under any interleaving, and drain to a clean state.
	///
	/// * Enforced in: `MutationQueue::enqueue`, `MutationQueue::cancel_queued`, `MutationQueue::dispatch_locked`
	/// * Failure symptom: stuck "syncing" records or fences that never clear.
	#[test]
	fn test_random_interleavings_preserve_invariants(ops in prop::collection::vec(arb_op(), 1..40)) {
		let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("test runtime");
		runtime.block_on(run_ops(ops));
	}
}
