//! Where the server reads tiles from.
//!
//! A [`TileBackend`] answers XYZ lookups asynchronously. [`SourceBackend`] wraps any resident
//! [`TileSource`], [`ArchiveBackend`] additionally swaps in a new reader when the archive file is replaced,
//! and [`ObjectStoreBackend`] fetches single objects that an export wrote.

use crate::store::{ObjectStore, metadata_key, tile_key};
use anyhow::{Context, Result, bail};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
	fmt::Debug,
	path::{Path, PathBuf},
	sync::Arc,
	time::{Duration, Instant, SystemTime},
};
use tilevault_container::{ArchiveReader, Tile, TileSource};
use tilevault_core::{TileCoord, TileError, TileScheme, TileSetMetadata};

#[async_trait]
pub trait TileBackend: Debug + Send + Sync {
	fn metadata(&self) -> Arc<TileSetMetadata>;

	/// Looks up the tile at the XYZ coordinate `coord`. The returned tile is in XYZ as well.
	async fn get_tile(&self, coord: TileCoord) -> Result<Option<Tile>>;
}

#[derive(Debug)]
pub struct SourceBackend {
	source: Arc<dyn TileSource>,
	metadata: Arc<TileSetMetadata>,
}

impl SourceBackend {
	pub fn new(source: Arc<dyn TileSource>) -> SourceBackend {
		let metadata = Arc::new(source.metadata().clone());
		SourceBackend { source, metadata }
	}
}

#[async_trait]
impl TileBackend for SourceBackend {
	fn metadata(&self) -> Arc<TileSetMetadata> {
		self.metadata.clone()
	}

	async fn get_tile(&self, coord: TileCoord) -> Result<Option<Tile>> {
		let source = self.source.clone();
		tokio::task::spawn_blocking(move || source.get_tile(&coord, TileScheme::Xyz)).await?
	}
}

/// Length and modification time identify one version of the archive file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileSignature {
	length: u64,
	modified: Option<SystemTime>,
}

impl FileSignature {
	fn read(path: &Path) -> Result<FileSignature> {
		let meta = std::fs::metadata(path).with_context(|| format!("reading file status of {path:?}"))?;
		Ok(FileSignature {
			length: meta.len(),
			modified: meta.modified().ok(),
		})
	}
}

#[derive(Debug)]
struct LoadedArchive {
	reader: Arc<ArchiveReader>,
	metadata: Arc<TileSetMetadata>,
	signature: FileSignature,
}

impl LoadedArchive {
	fn open(path: &Path) -> Result<LoadedArchive> {
		let signature = FileSignature::read(path)?;
		let reader = ArchiveReader::open(path)?;
		Ok(LoadedArchive {
			metadata: Arc::new(reader.metadata().clone()),
			reader: Arc::new(reader),
			signature,
		})
	}
}

#[derive(Debug)]
struct ArchiveSlot {
	path: PathBuf,
	reload_interval: Duration,
	current: ArcSwap<LoadedArchive>,
	last_check: Mutex<Instant>,
}

impl ArchiveSlot {
	/// Reopens the archive if the file changed since it was loaded. A file that cannot be opened leaves the
	/// current reader in place.
	fn refresh(&self) {
		{
			let mut last_check = self.last_check.lock();
			if last_check.elapsed() < self.reload_interval {
				return;
			}
			*last_check = Instant::now();
		}

		let signature = match FileSignature::read(&self.path) {
			Ok(signature) => signature,
			Err(error) => {
				log::warn!("keeping the loaded archive: {error:#}");
				return;
			}
		};
		if signature == self.current.load().signature {
			return;
		}

		match LoadedArchive::open(&self.path) {
			Ok(loaded) => {
				log::info!("reloaded archive {:?}", self.path);
				self.current.store(Arc::new(loaded));
			}
			Err(error) => log::warn!("keeping the loaded archive, reopening failed: {error:#}"),
		}
	}
}

/// An indexed archive that is reopened when the file at its path is replaced.
///
/// The file is checked at most once per `reload_interval`. Requests already running keep the reader they
/// started with.
#[derive(Clone, Debug)]
pub struct ArchiveBackend {
	slot: Arc<ArchiveSlot>,
}

impl ArchiveBackend {
	pub fn open(path: &Path, reload_interval: Duration) -> Result<ArchiveBackend> {
		let loaded = LoadedArchive::open(path)?;
		Ok(ArchiveBackend {
			slot: Arc::new(ArchiveSlot {
				path: path.to_path_buf(),
				reload_interval,
				current: ArcSwap::from_pointee(loaded),
				last_check: Mutex::new(Instant::now()),
			}),
		})
	}

	pub fn reader(&self) -> Arc<ArchiveReader> {
		self.slot.current.load().reader.clone()
	}
}

#[async_trait]
impl TileBackend for ArchiveBackend {
	fn metadata(&self) -> Arc<TileSetMetadata> {
		self.slot.current.load().metadata.clone()
	}

	async fn get_tile(&self, coord: TileCoord) -> Result<Option<Tile>> {
		let slot = self.slot.clone();
		tokio::task::spawn_blocking(move || {
			slot.refresh();
			let reader = slot.current.load().reader.clone();
			reader.get_tile(&coord, TileScheme::Xyz)
		})
		.await?
	}
}

/// Tiles stored as single objects under `{prefix}/{z}/{x}/{y}.{ext}`, described by `{prefix}/metadata.json`.
#[derive(Debug)]
pub struct ObjectStoreBackend {
	store: Arc<dyn ObjectStore>,
	prefix: String,
	metadata: Arc<TileSetMetadata>,
}

impl ObjectStoreBackend {
	/// Loads the metadata object once. Fails with [`TileError::NotFound`] if it does not exist.
	pub async fn open(store: Arc<dyn ObjectStore>, prefix: &str) -> Result<ObjectStoreBackend> {
		let key = metadata_key(prefix);
		let Some(blob) = store.get(&key).await? else {
			bail!(TileError::not_found(format!(
				"'{key}' does not exist in '{}'",
				store.store_name()
			)));
		};
		let metadata = TileSetMetadata::from_json_str(&blob.as_str())
			.with_context(|| format!("parsing '{key}' from '{}'", store.store_name()))?;
		log::debug!("serving '{prefix}' from '{}'", store.store_name());

		Ok(ObjectStoreBackend {
			store,
			prefix: prefix.to_string(),
			metadata: Arc::new(metadata),
		})
	}
}

#[async_trait]
impl TileBackend for ObjectStoreBackend {
	fn metadata(&self) -> Arc<TileSetMetadata> {
		self.metadata.clone()
	}

	async fn get_tile(&self, coord: TileCoord) -> Result<Option<Tile>> {
		let stored = coord.to_scheme(TileScheme::Xyz, self.metadata.scheme);
		let key = tile_key(&self.prefix, &stored, self.metadata.format);
		let data = self.store.get(&key).await?;
		Ok(data.map(|data| Tile::new(coord, TileScheme::Xyz, data, self.metadata.compression)))
	}
}
