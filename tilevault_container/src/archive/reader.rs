//! Random access and ordered iteration over an indexed archive.
//!
//! Opening reads the header, the metadata section and the root directory; the root stays resident. Leaf
//! pages are loaded on demand and kept in a small LRU cache. Lookups share one file handle behind a
//! mutex, iterators open their own.

use super::{ArchiveHeader, DirectoryEntry, HEADER_LENGTH, deserialize_entries, find_entry};
use crate::{Tile, TileIterator, TileSource};
use anyhow::{Context, Result, bail};
use lru::LruCache;
use parking_lot::Mutex;
use std::{
	fs::File,
	io::{Read, Seek, SeekFrom},
	num::NonZeroUsize,
	path::{Path, PathBuf},
	sync::Arc,
};
use tilevault_core::{
	Blob, ByteRange, TileCompression, TileCoord, TileError, TileScheme, TileSetMetadata, compression::decompress,
};

/// Directory levels below the root that a lookup follows before giving up.
const MAX_DEPTH: usize = 3;

const LEAF_CACHE_SIZE: usize = 64;

type Page = Arc<Vec<DirectoryEntry>>;

pub struct ArchiveReader {
	name: String,
	path: PathBuf,
	file: Mutex<File>,
	header: ArchiveHeader,
	metadata: TileSetMetadata,
	root: Page,
	leaf_cache: Mutex<LruCache<u64, Page>>,
}

impl ArchiveReader {
	/// Opens the archive at `path`.
	///
	/// Fails with [`TileError::NotFound`] if the file does not exist and with [`TileError::Corrupt`] if the
	/// header, the metadata or the root directory cannot be decoded.
	pub fn open(path: &Path) -> Result<ArchiveReader> {
		Self::open_inner(path).with_context(|| format!("opening archive '{}'", path.display()))
	}

	fn open_inner(path: &Path) -> Result<ArchiveReader> {
		log::debug!("open {path:?}");

		if !path.is_file() {
			bail!(TileError::not_found(format!("file {path:?} does not exist")));
		}
		let mut file = File::open(path).map_err(|e| TileError::permanent(format!("{path:?}: {e}")))?;
		let file_length = file.metadata()?.len();
		if file_length < HEADER_LENGTH {
			bail!(TileError::corrupt(format!(
				"{file_length} bytes are too short for an archive header"
			)));
		}

		let header = ArchiveHeader::deserialize(&read_range(&mut file, ByteRange::new(0, HEADER_LENGTH))?)?;
		for (section, range) in [
			("root directory", header.root_dir),
			("metadata", header.metadata),
			("leaf directories", header.leaf_dirs),
			("tile data", header.tile_data),
		] {
			if range.checked_end().is_none_or(|end| end > file_length) {
				bail!(TileError::corrupt(format!(
					"{section} {range:?} exceeds the file length of {file_length} bytes"
				)));
			}
		}

		let internal = header.internal_compression;
		let metadata_blob = decompress(read_range(&mut file, header.metadata)?, internal)
			.map_err(|e| TileError::corrupt(format!("metadata section: {e:#}")))?;
		let mut metadata = TileSetMetadata::from_json_str(&metadata_blob.as_str())
			.map_err(|e| TileError::corrupt(format!("metadata section: {e:#}")))?;
		metadata.scheme = TileScheme::Xyz;
		metadata.compression = header.tile_compression;
		metadata.format = header.tile_format;
		metadata.minzoom = header.min_zoom;
		metadata.maxzoom = header.max_zoom;
		if metadata.bounds.is_none() {
			metadata.bounds = header.bounds().ok();
		}

		let root = deserialize_entries(read_range(&mut file, header.root_dir)?, internal)?;
		log::trace!("root directory of {path:?} holds {} entries", root.len());

		Ok(ArchiveReader {
			name: path.display().to_string(),
			path: path.to_path_buf(),
			file: Mutex::new(file),
			header,
			metadata,
			root: Arc::new(root),
			leaf_cache: Mutex::new(LruCache::new(
				NonZeroUsize::new(LEAF_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
			)),
		})
	}

	pub fn header(&self) -> &ArchiveHeader {
		&self.header
	}

	pub fn root_entries(&self) -> &[DirectoryEntry] {
		&self.root
	}

	/// Entries of the leaf page a root pointer refers to.
	pub fn leaf_entries(&self, pointer: &DirectoryEntry) -> Result<Page> {
		if !pointer.is_leaf_pointer() {
			bail!("{pointer:?} does not point at a leaf page");
		}
		if let Some(page) = self.leaf_cache.lock().get(&pointer.offset) {
			return Ok(page.clone());
		}
		let range = section_range(pointer, self.header.leaf_dirs, "leaf directories")?;
		let blob = read_range(&mut self.file.lock(), range)?;
		let page = Arc::new(deserialize_entries(blob, self.header.internal_compression)?);
		self.leaf_cache.lock().put(pointer.offset, page.clone());
		Ok(page)
	}

	/// Every tile entry of the archive, leaf pages flattened, in tile id order.
	pub fn entries(&self) -> Result<Vec<DirectoryEntry>> {
		let mut entries = Vec::new();
		for entry in self.root.iter() {
			if entry.is_leaf_pointer() {
				entries.extend(self.leaf_entries(entry)?.iter().copied());
			} else {
				entries.push(*entry);
			}
		}
		Ok(entries)
	}

	fn tile_data(&self, entry: &DirectoryEntry) -> Result<Blob> {
		let range = section_range(entry, self.header.tile_data, "tile data")?;
		read_range(&mut self.file.lock(), range)
	}
}

/// File range of `entry`, which addresses bytes relative to `section`.
///
/// Fails with [`TileError::Corrupt`] if the entry reaches beyond the section, before anything is allocated.
fn section_range(entry: &DirectoryEntry, section: ByteRange, name: &str) -> Result<ByteRange> {
	match entry.range().checked_end() {
		Some(end) if end <= section.length => Ok(entry.range().get_shifted_forward(section.offset)),
		_ => bail!(TileError::corrupt(format!(
			"{entry:?} points outside the {name} section {section:?}"
		))),
	}
}

fn read_range(file: &mut File, range: ByteRange) -> Result<Blob> {
	let mut blob = Blob::new_sized(range.length as usize);
	file.seek(SeekFrom::Start(range.offset))?;
	file
		.read_exact(blob.as_mut_slice())
		.map_err(|e| TileError::corrupt(format!("reading {range:?}: {e}")))?;
	Ok(blob)
}

impl TileSource for ArchiveReader {
	fn source_name(&self) -> &str {
		&self.name
	}

	fn metadata(&self) -> &TileSetMetadata {
		&self.metadata
	}

	fn get_tile(&self, coord: &TileCoord, scheme: TileScheme) -> Result<Option<Tile>> {
		let xyz = coord.to_scheme(scheme, TileScheme::Xyz);
		log::trace!("read tile {xyz:?} from '{}'", self.name);

		if !self.metadata.contains_level(xyz.level) {
			return Ok(None);
		}
		let tile_id = xyz.tile_id();

		let mut page = self.root.clone();
		for _depth in 0..=MAX_DEPTH {
			let Some(entry) = find_entry(&page, tile_id).copied() else {
				return Ok(None);
			};
			if !entry.is_leaf_pointer() {
				let data = self
					.tile_data(&entry)
					.with_context(|| format!("fetching tile {xyz} from '{}'", self.name))?;
				let tile = Tile::new(xyz, TileScheme::Xyz, data, self.header.tile_compression);
				return Ok(Some(tile.to_scheme(scheme)));
			}
			page = self.leaf_entries(&entry)?;
		}

		bail!(TileError::corrupt(format!(
			"directories of '{}' nest deeper than {MAX_DEPTH} levels",
			self.name
		)))
	}

	fn iter_tiles(&self) -> Result<TileIterator> {
		let file = File::open(&self.path).with_context(|| format!("reopening '{}'", self.name))?;
		Ok(Box::new(ArchiveTiles {
			file,
			leaf_dirs: self.header.leaf_dirs,
			tile_data: self.header.tile_data,
			internal_compression: self.header.internal_compression,
			tile_compression: self.header.tile_compression,
			stack: vec![(self.root.clone(), 0)],
			run: None,
		}))
	}

	fn iter_tiles_by_id(&self) -> Result<TileIterator> {
		self.iter_tiles()
	}
}

impl std::fmt::Debug for ArchiveReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ArchiveReader")
			.field("name", &self.name)
			.field("header", &self.header)
			.finish()
	}
}

/// Depth-first walk over the directory tree that expands runs into individual tiles.
struct ArchiveTiles {
	file: File,
	leaf_dirs: ByteRange,
	tile_data: ByteRange,
	internal_compression: TileCompression,
	tile_compression: TileCompression,
	stack: Vec<(Page, usize)>,
	/// Entry being expanded, the next index within its run, and its content.
	run: Option<(DirectoryEntry, u32, Blob)>,
}

impl ArchiveTiles {
	fn next_entry(&mut self) -> Option<DirectoryEntry> {
		loop {
			let (page, position) = self.stack.last_mut()?;
			if let Some(entry) = page.get(*position) {
				*position += 1;
				return Some(*entry);
			}
			self.stack.pop();
		}
	}

	fn visit(&mut self, entry: DirectoryEntry) -> Result<()> {
		if entry.is_leaf_pointer() {
			if self.stack.len() > MAX_DEPTH {
				bail!(TileError::corrupt(format!(
					"directories nest deeper than {MAX_DEPTH} levels"
				)));
			}
			let range = section_range(&entry, self.leaf_dirs, "leaf directories")?;
			let blob = read_range(&mut self.file, range)?;
			let page = deserialize_entries(blob, self.internal_compression)?;
			self.stack.push((Arc::new(page), 0));
		} else {
			let range = section_range(&entry, self.tile_data, "tile data")?;
			let blob = read_range(&mut self.file, range)?;
			self.run = Some((entry, 0, blob));
		}
		Ok(())
	}
}

impl Iterator for ArchiveTiles {
	type Item = Result<Tile>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			if let Some((entry, index, blob)) = &mut self.run {
				if *index < entry.run_length {
					let tile_id = entry.tile_id + u64::from(*index);
					*index += 1;
					let compression = self.tile_compression;
					let blob = blob.clone();
					return Some(
						TileCoord::from_tile_id(tile_id).map(|coord| Tile::new(coord, TileScheme::Xyz, blob, compression)),
					);
				}
				self.run = None;
			}

			let entry = self.next_entry()?;
			if let Err(error) = self.visit(entry) {
				self.stack.clear();
				return Some(Err(error.context("iterating archive tiles")));
			}
		}
	}
}
