use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

/// Snapshot of a running export.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportProgress {
	/// Tiles handed to the upload queue so far.
	pub queued: u64,
	pub succeeded: u64,
	pub failed: u64,
	pub retries: u64,
	pub elapsed: Duration,
	/// Set on the last snapshot of a run.
	pub finished: bool,
}

impl ExportProgress {
	pub fn tiles_per_second(&self) -> f64 {
		let seconds = self.elapsed.as_secs_f64();
		if seconds > 0.0 { self.succeeded as f64 / seconds } else { 0.0 }
	}
}

pub trait ExportObserver: Send + Sync {
	fn progress(&self, progress: &ExportProgress);
}

/// Logs every snapshot at info level.
#[derive(Debug, Default)]
pub struct LogObserver;

impl ExportObserver for LogObserver {
	fn progress(&self, p: &ExportProgress) {
		log::info!(
			"export: {} queued, {} uploaded, {} failed, {} retries, {:.0} tiles/s{}",
			p.queued,
			p.succeeded,
			p.failed,
			p.retries,
			p.tiles_per_second(),
			if p.finished { ", done" } else { "" }
		);
	}
}

/// Shared flag that stops an export from enqueueing further tiles.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Outcome of [`TileExporter::run`](super::TileExporter::run).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
	/// Tiles stored in the destination.
	pub succeeded: u64,
	/// Keys rejected with a permanent error, sorted.
	pub permanent_failures: Vec<String>,
	/// Keys still failing transiently after the last retry, sorted.
	pub exhausted_failures: Vec<String>,
	pub retries: u64,
	pub cancelled: bool,
	pub metadata_uploaded: bool,
}

impl ExportSummary {
	/// Every key that was not stored, sorted.
	pub fn failed(&self) -> Vec<String> {
		let mut keys = [self.permanent_failures.as_slice(), self.exhausted_failures.as_slice()].concat();
		keys.sort();
		keys
	}

	pub fn is_complete(&self) -> bool {
		!self.cancelled && self.permanent_failures.is_empty() && self.exhausted_failures.is_empty()
	}
}
