//! Default parallelism derived from the number of logical CPUs.
//!
//! ```
//! use tilevault_core::ConcurrencyLimits;
//!
//! let limits = ConcurrencyLimits::default();
//! assert!(limits.uploads >= limits.readers);
//! ```

/// Upper bound for pooled SQLite connections per reader.
const MAX_READERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
	/// Simultaneous outbound uploads or fetches. These mostly wait on the network, so three per CPU.
	pub uploads: usize,
	/// Connections a store reader keeps open.
	pub readers: usize,
}

impl ConcurrencyLimits {
	pub fn new(uploads: usize, readers: usize) -> Self {
		Self {
			uploads: uploads.max(1),
			readers: readers.max(1),
		}
	}

	pub fn cpu_count() -> usize {
		num_cpus::get()
	}
}

impl Default for ConcurrencyLimits {
	fn default() -> Self {
		let cpus = num_cpus::get();
		Self::new(cpus * 3, cpus.clamp(2, MAX_READERS))
	}
}
