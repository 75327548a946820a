//! Error taxonomy shared by readers, writers, the exporter and the server.
//!
//! Operations return [`anyhow::Result`]. Failures that callers must be able to tell apart are raised as a
//! [`TileError`] (`bail!(TileError::corrupt(..))`) and may be wrapped in any number of context layers;
//! [`TileError::find`] digs the kind back out.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TileError {
	/// The requested tile, key or file does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	/// The store is structurally invalid: missing tables, bad magic, truncated sections.
	#[error("corrupt: {0}")]
	Corrupt(String),

	/// A coordinate lies outside the pyramid or outside the declared zoom range.
	#[error("out of range: {0}")]
	OutOfRange(String),

	/// Tiles handed to the archive writer are not strictly ascending by tile id.
	#[error("input not sorted: {0}")]
	InputNotSorted(String),

	/// Two merge inputs emit the same coordinate.
	#[error("overlap: {0}")]
	Overlap(String),

	/// A failure that may succeed when repeated (timeouts, throttling, 5xx).
	#[error("transient I/O error: {0}")]
	TransientIO(String),

	/// A failure that will not go away by retrying (4xx, rejected keys).
	#[error("permanent I/O error: {0}")]
	PermanentIO(String),

	#[error("write error: {0}")]
	WriteError(String),
}

impl TileError {
	pub fn not_found(msg: impl Into<String>) -> Self {
		Self::NotFound(msg.into())
	}

	pub fn corrupt(msg: impl Into<String>) -> Self {
		Self::Corrupt(msg.into())
	}

	pub fn out_of_range(msg: impl Into<String>) -> Self {
		Self::OutOfRange(msg.into())
	}

	pub fn transient(msg: impl Into<String>) -> Self {
		Self::TransientIO(msg.into())
	}

	pub fn permanent(msg: impl Into<String>) -> Self {
		Self::PermanentIO(msg.into())
	}

	pub fn write(msg: impl Into<String>) -> Self {
		Self::WriteError(msg.into())
	}

	/// Returns the `TileError` carried by `error`, looking through context layers and sources.
	pub fn find(error: &anyhow::Error) -> Option<&TileError> {
		error
			.downcast_ref::<TileError>()
			.or_else(|| error.chain().find_map(|cause| cause.downcast_ref::<TileError>()))
	}

	/// Only transient failures are worth another attempt.
	pub fn is_transient(error: &anyhow::Error) -> bool {
		matches!(Self::find(error), Some(TileError::TransientIO(_)))
	}
}
