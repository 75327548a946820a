//! Fixtures shared by the unit tests of this crate and the tests of downstream crates
//! (enable the `test` feature).

use crate::{MBTilesWriter, Tile, TileSet};
use anyhow::Result;
use std::{collections::BTreeMap, path::Path};
use tilevault_core::*;

/// Deterministic, coordinate-specific payload.
pub fn payload(coord: &TileCoord) -> Blob {
	Blob::from(format!("tile {}/{}/{}", coord.level, coord.x, coord.y))
}

/// Uncompressed vector tileset metadata in XYZ scheme.
pub fn metadata(minzoom: u8, maxzoom: u8) -> TileSetMetadata {
	TileSetMetadata {
		name: Some("fixture".to_string()),
		attribution: Some("TileVault tests".to_string()),
		bounds: Some(GeoBBox::new(-124.5, 32.5, -114.0, 42.0).expect("valid bounds")),
		minzoom,
		maxzoom,
		vector_layers: vec![VectorLayer {
			id: "sections".to_string(),
			fields: BTreeMap::from([("FRSTDIVLAB".to_string(), "String".to_string())]),
			..Default::default()
		}],
		scheme: TileScheme::Xyz,
		format: TileFormat::Mvt,
		compression: TileCompression::Uncompressed,
		..Default::default()
	}
}

/// Every tile of levels `minzoom..=maxzoom`, XYZ scheme, with [`payload`] content.
pub fn pyramid(minzoom: u8, maxzoom: u8) -> Vec<Tile> {
	let mut tiles = Vec::new();
	for level in minzoom..=maxzoom {
		let size = TileCoord::size(level) as u32;
		for y in 0..size {
			for x in 0..size {
				let coord = TileCoord::new(level, x, y).expect("valid coord");
				tiles.push(Tile::new(coord, TileScheme::Xyz, payload(&coord), TileCompression::Uncompressed));
			}
		}
	}
	tiles
}

pub fn tile_set(minzoom: u8, maxzoom: u8) -> TileSet {
	TileSet::new("fixture", metadata(minzoom, maxzoom), pyramid(minzoom, maxzoom))
}

pub fn write_mbtiles(path: &Path, tiles: &[Tile], metadata: &TileSetMetadata) -> Result<()> {
	MBTilesWriter::write(path, &TileSet::new("fixture", metadata.clone(), tiles.to_vec()))?;
	Ok(())
}
