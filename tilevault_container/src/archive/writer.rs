//! Single-pass writer for the indexed archive.
//!
//! Tiles must arrive in strictly ascending tile id order. Tile bytes are appended to the tile-data section
//! as they come in; directory entries collect in one page at a time. A full page is serialized into a
//! spooled leaf file as soon as the next entry needs room, leaving only a pointer behind, so memory stays
//! bounded by one page plus the pointer list. If no page was ever flushed the entries become the root
//! directory themselves.
//!
//! File layout: header | tile data | metadata | root directory | leaf directories.
//!
//! Everything is written to a temporary file next to the destination, which is renamed into place by
//! [`ArchiveWriter::finish`]. A writer that is dropped or fails leaves nothing at the destination.

use super::{ArchiveHeader, DirectoryEntry, HEADER_LENGTH, serialize_entries};
use crate::{Tile, TileSource};
use anyhow::{Context, Result, bail};
use std::{
	fs::File,
	io::{self, BufWriter, Seek, SeekFrom, Write},
	path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tilevault_core::{
	Blob, ByteRange, MAX_LEVEL, TileCompression, TileError, TileScheme, TileSetMetadata, compression::compress,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveParameters {
	/// Entries per leaf page, and the most entries a root may hold directly.
	pub leaf_size: usize,
	/// Compression of directory pages and the metadata section.
	pub internal_compression: TileCompression,
}

impl Default for ArchiveParameters {
	fn default() -> Self {
		ArchiveParameters {
			leaf_size: 4096,
			internal_compression: TileCompression::Gzip,
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
	/// Tile ids that resolve to content.
	pub addressed_tiles: u64,
	/// Directory entries pointing at tile data, after run-length collapsing.
	pub tile_entries: u64,
	/// Distinct blobs in the tile-data section.
	pub tile_contents: u64,
	pub leaf_pages: u64,
	/// Size of the finished file.
	pub bytes: u64,
}

pub struct ArchiveWriter {
	path: PathBuf,
	metadata: TileSetMetadata,
	parameters: ArchiveParameters,
	output: BufWriter<NamedTempFile>,
	data_length: u64,
	leaves: BufWriter<File>,
	leaves_length: u64,
	page: Vec<DirectoryEntry>,
	pointers: Vec<DirectoryEntry>,
	last_data: Option<Blob>,
	zoom_range: Option<(u8, u8)>,
	summary: ArchiveSummary,
}

impl ArchiveWriter {
	/// Starts a new archive that will appear at `path` once [`ArchiveWriter::finish`] succeeds.
	pub fn create(path: &Path, metadata: &TileSetMetadata, parameters: ArchiveParameters) -> Result<ArchiveWriter> {
		Self::create_inner(path, metadata, parameters)
			.map_err(as_write_error)
			.with_context(|| format!("creating archive '{}'", path.display()))
	}

	fn create_inner(path: &Path, metadata: &TileSetMetadata, parameters: ArchiveParameters) -> Result<ArchiveWriter> {
		log::debug!("create archive {path:?} with {parameters:?}");
		if parameters.leaf_size == 0 {
			bail!("leaf size must be at least 1");
		}
		if metadata.minzoom > metadata.maxzoom || metadata.maxzoom > MAX_LEVEL {
			bail!(TileError::out_of_range(format!(
				"declared zoom range {}..={} does not fit into levels 0..={MAX_LEVEL}",
				metadata.minzoom, metadata.maxzoom
			)));
		}

		let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
		let mut output = BufWriter::new(NamedTempFile::new_in(parent)?);
		output.write_all(&[0u8; HEADER_LENGTH as usize])?;

		Ok(ArchiveWriter {
			path: path.to_path_buf(),
			metadata: metadata.clone(),
			parameters,
			output,
			data_length: 0,
			leaves: BufWriter::new(tempfile::tempfile()?),
			leaves_length: 0,
			page: Vec::with_capacity(parameters.leaf_size),
			pointers: Vec::new(),
			last_data: None,
			zoom_range: None,
			summary: ArchiveSummary::default(),
		})
	}

	/// Appends one tile.
	///
	/// Fails with [`TileError::InputNotSorted`] unless the tile id is greater than the previous one, and
	/// with [`TileError::WriteError`] on I/O failure.
	pub fn add_tile(&mut self, tile: Tile) -> Result<()> {
		let coord = tile.xyz_coord();
		self.add_tile_inner(tile)
			.map_err(as_write_error)
			.with_context(|| format!("adding tile {coord} to archive '{}'", self.path.display()))
	}

	fn add_tile_inner(&mut self, tile: Tile) -> Result<()> {
		let tile_id = tile.tile_id();
		let level = tile.coord.level;

		if let Some(last) = self.page.last() {
			let last_id = last.tile_id + u64::from(last.run_length) - 1;
			if tile_id <= last_id {
				bail!(TileError::InputNotSorted(format!(
					"tile id {tile_id} ({}) follows tile id {last_id}",
					tile.xyz_coord()
				)));
			}
		}
		if tile.compression != self.metadata.compression {
			bail!(
				"tile {} is {} encoded but the archive stores {} tiles",
				tile.xyz_coord(),
				tile.compression,
				self.metadata.compression
			);
		}
		let length = u32::try_from(tile.data.len()).context("tile exceeds 4 GiB")?;

		self.zoom_range = Some(match self.zoom_range {
			Some((min, max)) => (min.min(level), max.max(level)),
			None => (level, level),
		});
		self.summary.addressed_tiles += 1;

		if let Some(last) = self.page.last_mut() {
			if continues_run(last, tile_id) && self.last_data.as_ref() == Some(&tile.data) {
				last.run_length += 1;
				return Ok(());
			}
		}

		if self.page.len() >= self.parameters.leaf_size {
			self.flush_page()?;
		}

		self.output.write_all(tile.data.as_slice())?;
		self.page.push(DirectoryEntry::new(tile_id, self.data_length, length, 1));
		self.data_length += u64::from(length);
		self.summary.tile_entries += 1;
		self.summary.tile_contents += 1;
		self.last_data = Some(tile.data);
		Ok(())
	}

	/// Moves the current page into the leaf file and keeps a pointer to it.
	fn flush_page(&mut self) -> Result<()> {
		let Some(first) = self.page.first() else {
			return Ok(());
		};
		let blob = serialize_entries(&self.page, self.parameters.internal_compression)?;
		let length = u32::try_from(blob.len()).context("leaf page exceeds 4 GiB")?;
		self.pointers.push(DirectoryEntry::new(first.tile_id, self.leaves_length, length, 0));
		self.leaves.write_all(blob.as_slice())?;
		self.leaves_length += blob.len();
		self.summary.leaf_pages += 1;
		log::trace!("flushed leaf page with {} entries", self.page.len());
		self.page.clear();
		Ok(())
	}

	/// Writes metadata and directories, fills in the header and renames the file into place.
	pub fn finish(self) -> Result<ArchiveSummary> {
		let path = self.path.clone();
		self.finish_inner()
			.map_err(as_write_error)
			.with_context(|| format!("finishing archive '{}'", path.display()))
	}

	fn finish_inner(mut self) -> Result<ArchiveSummary> {
		let internal = self.parameters.internal_compression;

		let mut metadata = self.metadata.clone();
		metadata.scheme = TileScheme::Xyz;
		if let Some((min, max)) = self.zoom_range {
			if min < metadata.minzoom || max > metadata.maxzoom {
				log::warn!(
					"tiles span zoom {min}..={max}, widening declared range {}..={}",
					metadata.minzoom,
					metadata.maxzoom
				);
			}
			metadata.minzoom = metadata.minzoom.min(min);
			metadata.maxzoom = metadata.maxzoom.max(max);
		}

		let mut header = ArchiveHeader::from_metadata(&metadata, internal);
		header.tile_data = ByteRange::new(HEADER_LENGTH, self.data_length);
		let mut position = header.tile_data.end();

		let metadata_blob = compress(Blob::from(metadata.to_json_string()?), internal)?;
		self.output.write_all(metadata_blob.as_slice())?;
		header.metadata = ByteRange::new(position, metadata_blob.len());
		position += metadata_blob.len();

		let root = if self.pointers.is_empty() {
			std::mem::take(&mut self.page)
		} else {
			self.flush_page()?;
			std::mem::take(&mut self.pointers)
		};
		let root_blob = serialize_entries(&root, internal)?;
		self.output.write_all(root_blob.as_slice())?;
		header.root_dir = ByteRange::new(position, root_blob.len());
		position += root_blob.len();

		let mut leaves = self.leaves.into_inner().map_err(|e| e.into_error())?;
		leaves.seek(SeekFrom::Start(0))?;
		let copied = io::copy(&mut leaves, &mut self.output)?;
		if copied != self.leaves_length {
			bail!("copied {copied} bytes of leaf directories, expected {}", self.leaves_length);
		}
		header.leaf_dirs = ByteRange::new(position, self.leaves_length);
		position += self.leaves_length;

		header.addressed_tiles = self.summary.addressed_tiles;
		header.tile_entries = self.summary.tile_entries;
		header.tile_contents = self.summary.tile_contents;

		let mut temp = self.output.into_inner().map_err(|e| e.into_error())?;
		let file = temp.as_file_mut();
		file.seek(SeekFrom::Start(0))?;
		file.write_all(header.serialize()?.as_slice())?;
		file.sync_all()?;
		temp.persist(&self.path)?;

		let summary = ArchiveSummary {
			bytes: position,
			..self.summary
		};
		log::debug!("finished archive {:?}: {summary:?}", self.path);
		Ok(summary)
	}

	/// Writes a whole archive from `tiles`, which must be sorted by ascending tile id.
	pub fn write_tiles<I>(
		path: &Path,
		tiles: I,
		metadata: &TileSetMetadata,
		parameters: ArchiveParameters,
	) -> Result<ArchiveSummary>
	where
		I: IntoIterator<Item = Result<Tile>>,
	{
		let mut writer = ArchiveWriter::create(path, metadata, parameters)?;
		for tile in tiles {
			writer.add_tile(tile?)?;
		}
		writer.finish()
	}

	/// Writes an archive holding every tile of `source`.
	pub fn write_source(path: &Path, source: &dyn TileSource, parameters: ArchiveParameters) -> Result<ArchiveSummary> {
		log::debug!("convert '{}' to archive {path:?}", source.source_name());
		Self::write_tiles(path, source.iter_tiles_by_id()?, source.metadata(), parameters)
	}
}

/// Whether `tile_id` directly follows the run of `entry` and the run can still grow. A full run is
/// followed by a fresh entry with the same content.
fn continues_run(entry: &DirectoryEntry, tile_id: u64) -> bool {
	entry.run_length < u32::MAX && tile_id == entry.tile_id + u64::from(entry.run_length)
}

/// Shorthand for [`ArchiveWriter::write_tiles`] with default parameters.
pub fn build_archive<I>(path: &Path, tiles: I, metadata: &TileSetMetadata) -> Result<ArchiveSummary>
where
	I: IntoIterator<Item = Result<Tile>>,
{
	ArchiveWriter::write_tiles(path, tiles, metadata, ArchiveParameters::default())
}

/// Keeps classified errors as they are and files everything else under [`TileError::WriteError`].
fn as_write_error(error: anyhow::Error) -> anyhow::Error {
	if TileError::find(&error).is_some() {
		error
	} else {
		TileError::write(format!("{error:#}")).into()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{ArchiveReader, TileSource, testing};
	use assert_fs::TempDir;
	use pretty_assertions::assert_eq;
	use tilevault_core::TileCoord;

	fn tile(level: u8, x: u32, y: u32, data: &str) -> Tile {
		Tile::new(
			TileCoord::new(level, x, y).unwrap(),
			TileScheme::Xyz,
			Blob::from(data),
			TileCompression::Uncompressed,
		)
	}

	#[test]
	fn unsorted_input_is_rejected_and_leaves_nothing() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("out.tvarchive");
		let tiles = vec![Ok(tile(1, 0, 0, "a")), Ok(tile(0, 0, 0, "b"))];
		let error = build_archive(&path, tiles, &testing::metadata(0, 1)).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::InputNotSorted(_))));
		assert!(!path.exists());
		assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
		Ok(())
	}

	#[test]
	fn duplicate_ids_are_rejected() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("out.tvarchive");
		let tiles = vec![Ok(tile(1, 1, 0, "a")), Ok(tile(1, 1, 0, "a"))];
		let error = build_archive(&path, tiles, &testing::metadata(0, 1)).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::InputNotSorted(_))));
	}

	#[test]
	fn inside_a_run_is_not_sorted_either() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("out.tvarchive");
		let tiles = vec![Ok(tile(1, 0, 0, "a")), Ok(tile(1, 1, 0, "a")), Ok(tile(1, 1, 0, "b"))];
		let error = build_archive(&path, tiles, &testing::metadata(0, 1)).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::InputNotSorted(_))));
	}

	#[test]
	fn missing_directory_is_a_write_error() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("missing").join("out.tvarchive");
		let error = build_archive(&path, Vec::new(), &testing::metadata(0, 1)).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::WriteError(_))));
	}

	#[test]
	fn source_errors_pass_through() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("out.tvarchive");
		let tiles = vec![Ok(tile(0, 0, 0, "a")), Err(TileError::corrupt("bad row").into())];
		let error = build_archive(&path, tiles, &testing::metadata(0, 1)).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::Corrupt(_))));
		assert!(!path.exists());
	}

	#[test]
	fn runs_collapse() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("out.tvarchive");
		// ids 1..=4 at level 1 share content, then a different tile at level 2
		let tiles = vec![
			tile(0, 0, 0, "root"),
			tile(1, 0, 0, "ocean"),
			tile(1, 1, 0, "ocean"),
			tile(1, 0, 1, "ocean"),
			tile(1, 1, 1, "ocean"),
			tile(2, 0, 0, "ocean"),
			tile(2, 2, 0, "ocean"),
		];
		let summary = build_archive(&path, tiles.into_iter().map(Ok), &testing::metadata(0, 2))?;
		assert_eq!(summary.addressed_tiles, 7);
		assert_eq!(summary.tile_entries, 3);
		assert_eq!(summary.leaf_pages, 0);

		let reader = ArchiveReader::open(&path)?;
		let entries = reader.entries()?;
		assert_eq!(
			entries.iter().map(|e| (e.tile_id, e.run_length)).collect::<Vec<_>>(),
			vec![(0, 1), (1, 5), (7, 1)]
		);
		for id in 1..=5 {
			let coord = TileCoord::from_tile_id(id)?;
			assert_eq!(reader.get_tile(&coord, TileScheme::Xyz)?.unwrap().data.as_str(), "ocean");
		}
		assert!(reader.get_tile(&TileCoord::new(2, 1, 0)?, TileScheme::Xyz)?.is_none());
		Ok(())
	}

	#[test]
	fn full_runs_are_not_extended() {
		let entry = DirectoryEntry::new(100, 0, 8, 5);
		assert!(continues_run(&entry, 105));
		assert!(!continues_run(&entry, 106));

		let full = DirectoryEntry::new(100, 0, 8, u32::MAX);
		assert!(!continues_run(&full, 100 + u64::from(u32::MAX)));
		assert!(continues_run(&DirectoryEntry::new(100, 0, 8, u32::MAX - 1), 100 + u64::from(u32::MAX) - 1));
	}

	#[test]
	fn declared_zoom_beyond_the_pyramid_is_rejected() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("out.tvarchive");
		for (minzoom, maxzoom) in [(0, 40), (5, 3)] {
			let mut metadata = testing::metadata(0, 0);
			metadata.minzoom = minzoom;
			metadata.maxzoom = maxzoom;
			let error = build_archive(&path, Vec::new(), &metadata).unwrap_err();
			assert!(matches!(TileError::find(&error), Some(TileError::OutOfRange(_))));
			assert!(!path.exists());
		}
	}

	#[test]
	fn pages_spill_into_leaves() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("out.tvarchive");
		let parameters = ArchiveParameters {
			leaf_size: 10,
			..Default::default()
		};
		let set = testing::tile_set(0, 4);
		let summary = ArchiveWriter::write_source(&path, &set, parameters)?;
		assert_eq!(summary.addressed_tiles, 341);
		assert_eq!(summary.leaf_pages, 35);
		assert_eq!(summary.bytes, std::fs::metadata(&path)?.len());

		let reader = ArchiveReader::open(&path)?;
		assert_eq!(reader.root_entries().len(), 35);
		assert!(reader.root_entries().iter().all(|e| e.is_leaf_pointer()));
		for tile in set.tiles() {
			assert_eq!(reader.get_tile(&tile.coord, TileScheme::Xyz)?.unwrap().data, tile.data);
		}
		Ok(())
	}

	#[test]
	fn exactly_one_page_stays_in_the_root() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("out.tvarchive");
		let parameters = ArchiveParameters {
			leaf_size: 21,
			..Default::default()
		};
		let summary = ArchiveWriter::write_source(&path, &testing::tile_set(0, 2), parameters)?;
		assert_eq!(summary.leaf_pages, 0);
		let reader = ArchiveReader::open(&path)?;
		assert_eq!(reader.root_entries().len(), 21);
		Ok(())
	}

	#[test]
	fn zoom_range_covers_all_tiles() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("out.tvarchive");
		let tiles = vec![Ok(tile(0, 0, 0, "a")), Ok(tile(3, 0, 0, "b"))];
		build_archive(&path, tiles, &testing::metadata(1, 2))?;
		let reader = ArchiveReader::open(&path)?;
		assert_eq!(reader.metadata().zoom_range(), 0..=3);
		Ok(())
	}

	#[test]
	fn wrong_tile_encoding_is_rejected() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("out.tvarchive");
		let mut gzip = tile(0, 0, 0, "a");
		gzip.compression = TileCompression::Gzip;
		assert!(build_archive(&path, vec![Ok(gzip)], &testing::metadata(0, 0)).is_err());
	}
}
