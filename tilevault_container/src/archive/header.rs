//! Fixed 127-byte little-endian archive header.
//!
//! | bytes   | field                                                   |
//! |---------|---------------------------------------------------------|
//! | 0..7    | magic `TVARCHV`                                         |
//! | 7       | version                                                 |
//! | 8..72   | root directory, metadata, leaf directories, tile data   |
//! |         | as `(offset: u64, length: u64)`                         |
//! | 72..96  | addressed tiles, tile entries, tile contents (`u64`)    |
//! | 96..102 | clustered, internal compression, tile compression,      |
//! |         | tile type, min zoom, max zoom (`u8`)                    |
//! | 102..118| bounds west, south, east, north (`i32`, degrees × 10^7) |
//! | 118     | center zoom                                             |
//! | 119..127| center lon, lat (`i32`, degrees × 10^7)                 |

use anyhow::{Context, Result, bail};
use tilevault_core::{
	Blob, ByteRange, GeoBBox, GeoCenter, MAX_LEVEL, TileCompression, TileError, TileFormat, TileSetMetadata,
	io::{ValueReader, ValueReaderSlice, ValueWriter, ValueWriterBlob},
};

pub const HEADER_MAGIC: &[u8; 7] = b"TVARCHV";
pub const HEADER_VERSION: u8 = 1;
pub const HEADER_LENGTH: u64 = 127;

#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveHeader {
	pub root_dir: ByteRange,
	pub metadata: ByteRange,
	pub leaf_dirs: ByteRange,
	pub tile_data: ByteRange,
	pub addressed_tiles: u64,
	pub tile_entries: u64,
	pub tile_contents: u64,
	pub clustered: bool,
	pub internal_compression: TileCompression,
	pub tile_compression: TileCompression,
	pub tile_format: TileFormat,
	pub min_zoom: u8,
	pub max_zoom: u8,
	pub bounds_e7: [i32; 4],
	pub center_zoom: u8,
	pub center_e7: [i32; 2],
}

impl ArchiveHeader {
	/// Header with all tileset-level fields taken from `metadata`. Sections and counts are filled in by
	/// the writer once they are known.
	pub fn from_metadata(metadata: &TileSetMetadata, internal_compression: TileCompression) -> ArchiveHeader {
		let bounds = metadata.bounds.unwrap_or_else(GeoBBox::world);
		let center = metadata.center.unwrap_or(GeoCenter {
			lon: (bounds.x_min + bounds.x_max) / 2.0,
			lat: (bounds.y_min + bounds.y_max) / 2.0,
			zoom: metadata.minzoom,
		});
		ArchiveHeader {
			root_dir: ByteRange::empty(),
			metadata: ByteRange::empty(),
			leaf_dirs: ByteRange::empty(),
			tile_data: ByteRange::empty(),
			addressed_tiles: 0,
			tile_entries: 0,
			tile_contents: 0,
			clustered: true,
			internal_compression,
			tile_compression: metadata.compression,
			tile_format: metadata.format,
			min_zoom: metadata.minzoom,
			max_zoom: metadata.maxzoom,
			bounds_e7: bounds.as_e7(),
			center_zoom: center.zoom,
			center_e7: center.as_e7(),
		}
	}

	pub fn bounds(&self) -> Result<GeoBBox> {
		GeoBBox::from_e7(self.bounds_e7)
	}

	pub fn center(&self) -> GeoCenter {
		GeoCenter::from_e7(self.center_e7, self.center_zoom)
	}

	pub fn serialize(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new_le();
		writer.write_slice(HEADER_MAGIC)?;
		writer.write_u8(HEADER_VERSION)?;

		writer.write_range(&self.root_dir)?;
		writer.write_range(&self.metadata)?;
		writer.write_range(&self.leaf_dirs)?;
		writer.write_range(&self.tile_data)?;
		writer.write_u64(self.addressed_tiles)?;
		writer.write_u64(self.tile_entries)?;
		writer.write_u64(self.tile_contents)?;

		writer.write_u8(u8::from(self.clustered))?;
		writer.write_u8(self.internal_compression.as_u8())?;
		writer.write_u8(self.tile_compression.as_u8())?;
		writer.write_u8(self.tile_format.as_u8())?;
		writer.write_u8(self.min_zoom)?;
		writer.write_u8(self.max_zoom)?;
		for value in self.bounds_e7 {
			writer.write_i32(value)?;
		}
		writer.write_u8(self.center_zoom)?;
		for value in self.center_e7 {
			writer.write_i32(value)?;
		}

		Ok(writer.into_blob())
	}

	/// Parses a header, failing with [`TileError::Corrupt`] on wrong length, magic or version.
	pub fn deserialize(blob: &Blob) -> Result<Self> {
		let buffer = blob.as_slice();
		if buffer.len() as u64 != HEADER_LENGTH {
			bail!(TileError::corrupt(format!(
				"archive header has {} bytes, expected {HEADER_LENGTH}",
				buffer.len()
			)));
		}
		if &buffer[0..7] != HEADER_MAGIC {
			bail!(TileError::corrupt("not a tile archive: wrong magic"));
		}
		if buffer[7] != HEADER_VERSION {
			bail!(TileError::corrupt(format!(
				"unsupported archive version {}, expected {HEADER_VERSION}",
				buffer[7]
			)));
		}

		let mut reader = ValueReaderSlice::new_le(&buffer[8..]);
		let mut read = || -> Result<ArchiveHeader> {
			Ok(ArchiveHeader {
				root_dir: reader.read_range()?,
				metadata: reader.read_range()?,
				leaf_dirs: reader.read_range()?,
				tile_data: reader.read_range()?,
				addressed_tiles: reader.read_u64()?,
				tile_entries: reader.read_u64()?,
				tile_contents: reader.read_u64()?,
				clustered: reader.read_u8()? == 1,
				internal_compression: TileCompression::from_u8(reader.read_u8()?)?,
				tile_compression: TileCompression::from_u8(reader.read_u8()?)?,
				tile_format: TileFormat::from_u8(reader.read_u8()?)?,
				min_zoom: reader.read_u8()?,
				max_zoom: reader.read_u8()?,
				bounds_e7: [reader.read_i32()?, reader.read_i32()?, reader.read_i32()?, reader.read_i32()?],
				center_zoom: reader.read_u8()?,
				center_e7: [reader.read_i32()?, reader.read_i32()?],
			})
		};
		let header = read()
			.map_err(|error| TileError::corrupt(format!("{error:#}")))
			.context("parsing archive header")?;
		if header.min_zoom > header.max_zoom || header.max_zoom > MAX_LEVEL {
			bail!(TileError::corrupt(format!(
				"archive header declares zoom range {}..={}, levels end at {MAX_LEVEL}",
				header.min_zoom, header.max_zoom
			)));
		}
		Ok(header)
	}
}
