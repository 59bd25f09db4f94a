//! Configuration for optimistic mutation queues.
//!
//! Configuration is written in TOML. Every section and key is optional and
//! falls back to its default; unknown keys are rejected so typos surface at
//! load time instead of being silently ignored.
//!
//! ```toml
//! [queue]
//! concurrency = 4
//!
//! [poll]
//! enabled = true
//! interval_ms = 5000
//!
//! [push]
//! enabled = true
//! buffer = 256
//!
//! [log]
//! filter = "info,optimist_queue=debug"
//! format = "json"
//! ```

pub mod error;

use std::path::Path;
use std::time::Duration;

pub use error::{ConfigError, Result};
use serde::Deserialize;

/// Parsed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimistConfig {
	pub queue: QueueConfig,
	pub poll: PollConfig,
	pub push: PushConfig,
	pub log: LogConfig,
}

/// Mutation queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
	/// Global ceiling on concurrently running mutations.
	pub concurrency: usize,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self { concurrency: 4 }
	}
}

impl QueueConfig {
	/// Config with the given concurrency ceiling.
	pub fn with_concurrency(concurrency: usize) -> Self {
		Self { concurrency }
	}
}

/// Periodic full-collection poll settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
	pub enabled: bool,
	pub interval_ms: u64,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			interval_ms: 5_000,
		}
	}
}

impl PollConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

/// Push channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushConfig {
	pub enabled: bool,
	/// Capacity of the bounded channel between the transport and the push driver.
	pub buffer: usize,
}

impl Default for PushConfig {
	fn default() -> Self {
		Self { enabled: true, buffer: 256 }
	}
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

/// Logging settings consumed by binaries when installing a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
	/// `EnvFilter` directive string. `RUST_LOG` takes precedence when set.
	pub filter: String,
	pub format: LogFormat,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			filter: "info".to_string(),
			format: LogFormat::Pretty,
		}
	}
}

impl OptimistConfig {
	/// Parse a TOML string into a validated [`OptimistConfig`].
	pub fn parse(input: &str) -> Result<Self> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Load configuration from a file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
			path: path.to_path_buf(),
			error: e,
		})?;
		Self::parse(&content)
	}

	/// Checks value ranges serde cannot express.
	pub fn validate(&self) -> Result<()> {
		if self.queue.concurrency == 0 {
			return Err(ConfigError::Invalid {
				field: "queue.concurrency",
				reason: "must be at least 1",
			});
		}
		if self.poll.interval_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "poll.interval_ms",
				reason: "must be at least 1",
			});
		}
		if self.push.buffer == 0 {
			return Err(ConfigError::Invalid {
				field: "push.buffer",
				reason: "must be at least 1",
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn empty_input_yields_defaults() {
		let config = OptimistConfig::parse("").unwrap();
		assert_eq!(config, OptimistConfig::default());
		assert_eq!(config.queue.concurrency, 4);
		assert_eq!(config.poll.interval(), Duration::from_secs(5));
	}

	#[test]
	fn partial_sections_keep_remaining_defaults() {
		let config = OptimistConfig::parse(
			r#"
			[queue]
			concurrency = 1

			[log]
			format = "json"
			"#,
		)
		.unwrap();
		assert_eq!(config.queue.concurrency, 1);
		assert_eq!(config.log.format, LogFormat::Json);
		assert_eq!(config.log.filter, "info");
		assert!(config.poll.enabled);
		assert_eq!(config.push.buffer, 256);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = OptimistConfig::parse("[queue]\nconcurency = 2\n").unwrap_err();
		assert!(matches!(err, ConfigError::Toml(_)), "got {err:?}");
	}

	#[test]
	fn zero_concurrency_is_invalid() {
		let err = OptimistConfig::parse("[queue]\nconcurrency = 0\n").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "queue.concurrency", .. }), "got {err:?}");
	}

	#[test]
	fn zero_poll_interval_is_invalid() {
		let err = OptimistConfig::parse("[poll]\ninterval_ms = 0\n").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "poll.interval_ms", .. }), "got {err:?}");
	}

	#[test]
	fn load_reads_file_and_reports_missing_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[poll]\ninterval_ms = 250").unwrap();
		let config = OptimistConfig::load(file.path()).unwrap();
		assert_eq!(config.poll.interval(), Duration::from_millis(250));

		let missing = file.path().with_extension("missing");
		let err = OptimistConfig::load(&missing).unwrap_err();
		assert!(matches!(err, ConfigError::Io { ref path, .. } if path == &missing), "got {err:?}");
	}
}
