use thiserror::Error;

/// Failure reported by a confirmation source.
///
/// Drivers log and record these; they never stop a driver on their own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
	/// The source could not be reached.
	#[error("transport error: {0}")]
	Transport(String),
	/// The source answered with something that is not a valid collection or message.
	#[error("malformed payload: {0}")]
	Decode(String),
}
