use crate::{
	server::{ArchiveBackend, ObjectStoreBackend, SourceBackend, TileBackend},
	store::{DirectoryObjectStore, HttpObjectStore, ObjectStore},
};
use anyhow::{Result, bail};
use serde::Deserialize;
use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};
use tilevault_container::{ArchiveReader, MBTilesReader, TileSource};

/// Where tiles are read from. Exactly one of `archive`, `mbtiles`, `directory` and `http` is set.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
	/// Indexed archive file.
	pub archive: Option<PathBuf>,

	pub mbtiles: Option<PathBuf>,

	/// Directory an export wrote to.
	pub directory: Option<PathBuf>,

	/// Base URL of an object store an export wrote to.
	pub http: Option<String>,

	/// Key prefix inside `directory` or `http`. Defaults to `tiles`.
	pub prefix: Option<String>,
}

enum Location<'a> {
	Archive(&'a Path),
	MBTiles(&'a Path),
	Store(Arc<dyn ObjectStore>),
}

impl SourceConfig {
	pub fn resolve_paths(&mut self, base: &Path) {
		for path in [&mut self.archive, &mut self.mbtiles, &mut self.directory].into_iter().flatten() {
			if path.is_relative() {
				*path = base.join(&*path);
			}
		}
	}

	pub fn prefix(&self) -> &str {
		self.prefix.as_deref().unwrap_or("tiles")
	}

	fn location(&self) -> Result<Location<'_>> {
		let location = match (&self.archive, &self.mbtiles, &self.directory, &self.http) {
			(Some(path), None, None, None) => Location::Archive(path),
			(None, Some(path), None, None) => Location::MBTiles(path),
			(None, None, Some(path), None) => Location::Store(Arc::new(DirectoryObjectStore::new(path)?)),
			(None, None, None, Some(url)) => Location::Store(Arc::new(HttpObjectStore::new(url)?)),
			(None, None, None, None) => bail!("source needs one of 'archive', 'mbtiles', 'directory' or 'http'"),
			_ => bail!("source must set only one of 'archive', 'mbtiles', 'directory' and 'http'"),
		};
		Ok(location)
	}

	/// Opens a local tileset for reading all tiles, as needed by exports.
	pub fn open_source(&self) -> Result<Arc<dyn TileSource>> {
		Ok(match self.location()? {
			Location::Archive(path) => Arc::new(ArchiveReader::open(path)?),
			Location::MBTiles(path) => Arc::new(MBTilesReader::open(path)?),
			Location::Store(store) => bail!(
				"'{}' holds single objects and cannot be read as a tileset",
				store.store_name()
			),
		})
	}

	/// Opens the backend a server reads tiles from. Archives are reopened when replaced, checked at most once
	/// per `reload_interval`.
	pub async fn open_backend(&self, reload_interval: Duration) -> Result<Arc<dyn TileBackend>> {
		Ok(match self.location()? {
			Location::Archive(path) => Arc::new(ArchiveBackend::open(path, reload_interval)?),
			Location::MBTiles(path) => {
				let path = path.to_path_buf();
				let reader = tokio::task::spawn_blocking(move || MBTilesReader::open(&path)).await??;
				Arc::new(SourceBackend::new(Arc::new(reader)))
			}
			Location::Store(store) => Arc::new(ObjectStoreBackend::open(store, self.prefix()).await?),
		})
	}
}
