//! MBTiles in, archive out: the conversions a tile pipeline runs end to end.

use anyhow::Result;
use assert_fs::TempDir;
use pretty_assertions::assert_eq;
use std::{path::Path, sync::Arc};
use tilevault_container::*;
use tilevault_core::{compression::compress, *};

fn metadata(minzoom: u8, maxzoom: u8) -> TileSetMetadata {
	TileSetMetadata {
		name: Some("sections".to_string()),
		bounds: Some(GeoBBox::new(-124.5, 32.5, -114.0, 42.0).unwrap()),
		minzoom,
		maxzoom,
		scheme: TileScheme::Xyz,
		format: TileFormat::Mvt,
		compression: TileCompression::Gzip,
		..Default::default()
	}
}

/// Gzip encoded pyramid where every tile of `empty_level` carries the same "empty" payload.
fn pyramid(minzoom: u8, maxzoom: u8, empty_level: Option<u8>) -> Vec<Tile> {
	let mut tiles = Vec::new();
	for level in minzoom..=maxzoom {
		let size = TileCoord::size(level) as u32;
		for y in 0..size {
			for x in 0..size {
				let text = if Some(level) == empty_level {
					"empty".to_string()
				} else {
					format!("{level}/{x}/{y}")
				};
				let data = compress(Blob::from(text), TileCompression::Gzip).unwrap();
				let coord = TileCoord::new(level, x, y).unwrap();
				tiles.push(Tile::new(coord, TileScheme::Xyz, data, TileCompression::Gzip));
			}
		}
	}
	tiles
}

fn write_mbtiles(path: &Path, minzoom: u8, maxzoom: u8, empty_level: Option<u8>) -> Result<()> {
	let set = TileSet::new("fixture", metadata(minzoom, maxzoom), pyramid(minzoom, maxzoom, empty_level));
	MBTilesWriter::write(path, &set)?;
	Ok(())
}

#[test]
fn mbtiles_to_archive() -> Result<()> {
	let dir = TempDir::new()?;
	let mbtiles = dir.path().join("sections.mbtiles");
	let archive = dir.path().join("sections.tvarchive");
	write_mbtiles(&mbtiles, 0, 4, Some(4))?;

	let reader = MBTilesReader::open(&mbtiles)?;
	let parameters = ArchiveParameters {
		leaf_size: 16,
		..Default::default()
	};
	let summary = ArchiveWriter::write_source(&archive, &reader, parameters)?;
	assert_eq!(summary.addressed_tiles, 341);
	// level 4 collapses into one run
	assert_eq!(summary.tile_entries, 85 + 1);

	let archive = ArchiveReader::open(&archive)?;
	assert_eq!(archive.metadata().compression, TileCompression::Gzip);
	assert_eq!(archive.metadata().name.as_deref(), Some("sections"));

	for tms_row in [0, 5, 15] {
		let coord = TileCoord::new(4, 7, tms_row)?;
		let from_mbtiles = reader.get_tile(&coord, TileScheme::Tms)?.unwrap();
		let from_archive = archive.get_tile(&coord, TileScheme::Tms)?.unwrap();
		assert_eq!(from_archive.data, from_mbtiles.data);
		assert_eq!(from_archive.decompressed()?.as_str(), "empty");
	}

	let coord = TileCoord::new(3, 2, 6)?;
	let tile = archive.get_tile(&coord, TileScheme::Xyz)?.unwrap();
	assert_eq!(tile.decompressed()?.as_str(), "3/2/6");
	assert_eq!(tile.compression, TileCompression::Gzip);
	Ok(())
}

#[test]
fn archive_iteration_matches_mbtiles() -> Result<()> {
	let dir = TempDir::new()?;
	let mbtiles = dir.path().join("sections.mbtiles");
	let archive = dir.path().join("sections.tvarchive");
	write_mbtiles(&mbtiles, 0, 3, None)?;

	let reader = MBTilesReader::open(&mbtiles)?;
	build_archive(&archive, reader.iter_tiles_by_id()?, reader.metadata())?;

	let expected = reader.iter_tiles_by_id()?.collect::<Result<Vec<_>>>()?;
	let actual = ArchiveReader::open(&archive)?.iter_tiles()?.collect::<Result<Vec<_>>>()?;
	assert_eq!(actual, expected);
	Ok(())
}

#[test]
fn merge_two_mbtiles_into_one_archive() -> Result<()> {
	let dir = TempDir::new()?;
	let low = dir.path().join("low.mbtiles");
	let high = dir.path().join("high.mbtiles");
	let archive = dir.path().join("merged.tvarchive");
	write_mbtiles(&low, 0, 5, None)?;
	write_mbtiles(&high, 4, 5, None)?;

	let merged = merge(vec![
		MergeInput::new(Arc::new(MBTilesReader::open(&low)?), 0, 3)?,
		MergeInput::whole(Arc::new(MBTilesReader::open(&high)?))?,
	])?;
	let summary = ArchiveWriter::write_source(&archive, &merged, ArchiveParameters::default())?;
	assert_eq!(summary.addressed_tiles, 1365);

	let archive = ArchiveReader::open(&archive)?;
	assert_eq!(archive.metadata().zoom_range(), 0..=5);
	let tile = archive.get_tile(&TileCoord::new(5, 31, 0)?, TileScheme::Xyz)?.unwrap();
	assert_eq!(tile.decompressed()?.as_str(), "5/31/0");
	Ok(())
}

#[test]
fn merge_rejects_overlapping_mbtiles() -> Result<()> {
	let dir = TempDir::new()?;
	let a = dir.path().join("a.mbtiles");
	let b = dir.path().join("b.mbtiles");
	write_mbtiles(&a, 0, 3, None)?;
	write_mbtiles(&b, 3, 4, None)?;

	let error = merge(vec![
		MergeInput::whole(Arc::new(MBTilesReader::open(&a)?))?,
		MergeInput::whole(Arc::new(MBTilesReader::open(&b)?))?,
	])
	.unwrap_err();
	assert!(matches!(TileError::find(&error), Some(TileError::Overlap(_))));
	Ok(())
}
