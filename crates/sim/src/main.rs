//! Optimist simulator.
//!
//! Runs a scripted create / start / stop / restart / update / delete workload
//! against an in-memory service backend with configurable latency and
//! injected failures. Both confirmation drivers are wired up: the poll
//! driver fetches the backend's collection, the push driver consumes the
//! change notifications the backend emits after every mutation.

mod backend;
mod scenario;
mod service;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use optimist_config::{LogConfig, LogFormat, OptimistConfig};
use optimist_queue::{MutationQueue, SyncStatus};
use optimist_sync::{SyncDrivers, push_channel};
use serde::Serialize;
use tracing::info;

use crate::backend::{FakeBackend, Faults};
use crate::scenario::Scenario;
use crate::service::{Service, ServiceStatus};

/// Simulator command line arguments.
#[derive(Parser, Debug)]
#[command(name = "optimist-sim")]
#[command(about = "Drive an optimistic mutation queue against a simulated service backend")]
struct Args {
	/// Configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Backend latency per call
	#[arg(long, value_name = "MS", default_value_t = 50)]
	latency_ms: u64,

	/// Fail every Nth mutating backend call (0 disables)
	#[arg(long, value_name = "N", default_value_t = 0)]
	fail_every: u64,

	/// Override `queue.concurrency`
	#[arg(long, value_name = "N")]
	concurrency: Option<usize>,

	/// Override `poll.interval_ms`
	#[arg(long, value_name = "MS")]
	poll_interval_ms: Option<u64>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

/// Final view of one record, printed as JSON.
#[derive(Serialize)]
struct RecordView<'a> {
	#[serde(flatten)]
	service: &'a Service,
	sync: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => OptimistConfig::load(path)?,
		None => OptimistConfig::default(),
	};
	if let Some(concurrency) = args.concurrency {
		config.queue.concurrency = concurrency;
	}
	if let Some(interval_ms) = args.poll_interval_ms {
		config.poll.interval_ms = interval_ms;
	}
	config.validate()?;

	setup_tracing(&config.log, args.verbose)?;
	info!(concurrency = config.queue.concurrency, poll_ms = config.poll.interval_ms, "starting optimist-sim");

	let seed = vec![
		Service::new("api", "API", ServiceStatus::Running, 2),
		Service::new("worker", "Worker", ServiceStatus::Stopped, 1),
	];
	let backend = FakeBackend::new(
		Faults {
			latency: Duration::from_millis(args.latency_ms),
			fail_every: args.fail_every,
		},
		seed.clone(),
	);
	let queue = MutationQueue::with_entities(&config.queue, seed);

	let (push_tx, push_rx) = push_channel(config.push.buffer);
	backend.attach_push(push_tx);
	let drivers = SyncDrivers::start(&queue, Some(Arc::new(backend.clone())), Some(Box::new(push_rx)), &config);

	let outcome = Scenario::new(queue.clone(), backend.clone()).run().await;
	queue.idle().await;

	// One more poll round so any suppressed update is re-read.
	if config.poll.enabled {
		tokio::time::sleep(config.poll.interval() + Duration::from_millis(args.latency_ms)).await;
	}
	queue.close();
	backend.detach_push();
	let registry = drivers.registry().clone();
	drivers.shutdown().await;

	let records = queue.records();
	let views: Vec<RecordView<'_>> = records
		.iter()
		.map(|record| RecordView {
			service: &record.entity,
			sync: match record.status {
				SyncStatus::Synced => "synced",
				SyncStatus::Syncing => "syncing",
				SyncStatus::Conflict(_) => "conflict",
			},
		})
		.collect();
	println!("{}", serde_json::to_string_pretty(&views).context("serializing final records")?);

	let stats = queue.stats();
	info!(succeeded = outcome.succeeded, failed = outcome.failed, ?stats, "sim.report");
	for driver in registry.snapshots() {
		info!(
			driver = %driver.name,
			deliveries = driver.deliveries,
			failures = driver.failures,
			last_error = driver.last_error.as_deref().unwrap_or("-"),
			"sim.driver"
		);
	}
	let converged = records.iter().map(|record| &record.entity).eq(backend.services().iter());
	info!(converged, "sim.done");

	Ok(())
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured filter.
fn setup_tracing(log: &LogConfig, verbose: bool) -> anyhow::Result<()> {
	use tracing_subscriber::EnvFilter;

	let directives = if verbose { "debug" } else { log.filter.as_str() };
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::try_new(directives).with_context(|| format!("invalid log filter {directives:?}"))?,
	};

	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);
	let installed = match log.format {
		LogFormat::Pretty => builder.try_init(),
		LogFormat::Json => builder.json().try_init(),
	};
	installed.map_err(|err| anyhow::anyhow!(err))
}
