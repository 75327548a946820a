//! Key/value object stores that exported tiles are uploaded to and served from.
//!
//! Keys are `/`-separated relative paths such as `tiles/7/68/41.pbf`. A `put` overwrites whatever the key
//! held before, so uploads can be repeated safely. Failures are reported as [`TileError::TransientIO`]
//! when repeating the call may help and as [`TileError::PermanentIO`] otherwise.

mod directory;
mod http;
mod memory;

pub use directory::DirectoryObjectStore;
pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::fmt::Debug;
use tilevault_core::{Blob, TileCoord, TileError, TileFormat};

/// Payload and HTTP headers of one stored object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreObject {
	pub data: Blob,
	pub content_type: String,
	pub content_encoding: Option<String>,
	pub cache_control: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Debug + Send + Sync {
	fn store_name(&self) -> &str;

	async fn put(&self, key: &str, object: StoreObject) -> Result<()>;

	/// Returns `None` if nothing is stored under `key`.
	async fn get(&self, key: &str) -> Result<Option<Blob>>;
}

/// `{prefix}/{z}/{x}/{y}.{ext}`, or without the prefix segment when `prefix` is empty.
pub fn tile_key(prefix: &str, coord: &TileCoord, format: TileFormat) -> String {
	let path = format!("{}/{}/{}.{}", coord.level, coord.x, coord.y, format.extension());
	join_key(prefix, &path)
}

/// `{prefix}/{z}/{x}/{y}.{ext}` with the placeholders left in, as used in TileJSON `tiles` URLs.
pub fn tile_url_template(prefix: &str, format: TileFormat) -> String {
	join_key(prefix, &format!("{{z}}/{{x}}/{{y}}.{}", format.extension()))
}

pub fn metadata_key(prefix: &str) -> String {
	join_key(prefix, "metadata.json")
}

fn join_key(prefix: &str, path: &str) -> String {
	let prefix = prefix.trim_matches('/');
	if prefix.is_empty() {
		path.to_string()
	} else {
		format!("{prefix}/{path}")
	}
}

/// Rejects keys that could escape the store root.
pub(crate) fn check_key(key: &str) -> Result<()> {
	if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
		bail!(TileError::permanent(format!("invalid object key '{key}'")));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("tiles", "tiles/3/2/1.pbf")]
	#[case("/tiles/", "tiles/3/2/1.pbf")]
	#[case("a/b", "a/b/3/2/1.pbf")]
	#[case("", "3/2/1.pbf")]
	fn keys(#[case] prefix: &str, #[case] expected: &str) {
		let coord = TileCoord::new(3, 2, 1).unwrap();
		assert_eq!(tile_key(prefix, &coord, TileFormat::Mvt), expected);
	}

	#[test]
	fn url_template() {
		assert_eq!(tile_url_template("tiles", TileFormat::Mvt), "tiles/{z}/{x}/{y}.pbf");
		assert_eq!(tile_url_template("", TileFormat::Png), "{z}/{x}/{y}.png");
	}

	#[test]
	fn metadata_keys() {
		assert_eq!(metadata_key("tiles"), "tiles/metadata.json");
		assert_eq!(metadata_key(""), "metadata.json");
	}

	#[rstest]
	#[case("tiles/0/0/0.pbf", true)]
	#[case("metadata.json", true)]
	#[case("", false)]
	#[case("/etc/passwd", false)]
	#[case("tiles/../../etc", false)]
	#[case("tiles//0.pbf", false)]
	#[case("./x", false)]
	fn key_check(#[case] key: &str, #[case] valid: bool) {
		let result = check_key(key);
		assert_eq!(result.is_ok(), valid);
		if let Err(error) = result {
			assert!(matches!(TileError::find(&error), Some(TileError::PermanentIO(_))));
		}
	}
}
