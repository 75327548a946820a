use std::time::Duration;
use tilevault_core::{ConcurrencyLimits, TileScheme};

#[derive(Clone, Debug, PartialEq)]
pub struct ExportParameters {
	/// Uploads in flight at the same time.
	pub concurrency: usize,
	/// Extra attempts for a transient failure before the key is given up.
	pub max_retries: u32,
	/// Tiles buffered between the reader and the upload workers.
	pub queue_size: usize,
	/// Key prefix, e.g. `tiles` for `tiles/{z}/{x}/{y}.pbf`.
	pub prefix: String,
	pub cache_control: String,
	/// First retry delay; doubles with every attempt up to `max_delay`.
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub progress_interval: Duration,
	/// Upload `{prefix}/metadata.json` after the tiles.
	pub upload_metadata: bool,
	/// Tile URL template written into the uploaded TileJSON. Defaults to the relative key template.
	pub tile_url: Option<String>,
	/// Row scheme of the keys.
	pub scheme: TileScheme,
}

impl Default for ExportParameters {
	fn default() -> Self {
		ExportParameters {
			concurrency: ConcurrencyLimits::default().uploads,
			max_retries: 3,
			queue_size: 1000,
			prefix: "tiles".to_string(),
			cache_control: "public, max-age=31536000".to_string(),
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(10),
			progress_interval: Duration::from_secs(5),
			upload_metadata: true,
			tile_url: None,
			scheme: TileScheme::Xyz,
		}
	}
}

impl ExportParameters {
	/// Delay before retry number `attempt` (starting at 0).
	pub fn backoff(&self, attempt: u32) -> Duration {
		self
			.base_delay
			.saturating_mul(1u32 << attempt.min(16))
			.min(self.max_delay)
	}
}
