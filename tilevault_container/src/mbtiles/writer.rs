//! Write any [`TileSource`] into a new MBTiles (SQLite) database.
//!
//! The database is built in a temporary file next to the destination and renamed into place once every
//! tile and metadata key is committed. Rows are stored in TMS order (`tile_row = 2^z - 1 - y`).

use crate::{Tile, TileSource};
use anyhow::{Context, Result};
use r2d2_sqlite::rusqlite::{Connection, params};
use std::path::Path;
use tempfile::NamedTempFile;
use tilevault_core::{TileScheme, TileSetMetadata};

/// Tiles inserted per transaction.
const BATCH_SIZE: usize = 2000;

pub struct MBTilesWriter {
	conn: Connection,
}

impl MBTilesWriter {
	fn new(path: &Path) -> Result<Self> {
		let conn = Connection::open(path)?;
		conn.execute_batch(
			"PRAGMA journal_mode = OFF;
			PRAGMA synchronous = OFF;
			CREATE TABLE metadata (name TEXT, value TEXT, UNIQUE (name));
			CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB, UNIQUE (zoom_level, tile_column, tile_row));
			CREATE UNIQUE INDEX tile_index on tiles (zoom_level, tile_column, tile_row);",
		)?;
		Ok(MBTilesWriter { conn })
	}

	fn add_tiles(&mut self, tiles: &[Tile]) -> Result<()> {
		let transaction = self.conn.transaction()?;
		{
			let mut stmt = transaction.prepare_cached(
				"INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
			)?;
			for tile in tiles {
				let c = tile.coord.to_scheme(tile.scheme, TileScheme::Tms);
				stmt.execute(params![c.level, c.x, c.y, tile.data.as_slice()])?;
			}
		}
		transaction.commit()?;
		Ok(())
	}

	fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
		self.conn.execute(
			"INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
			params![name, value],
		)?;
		Ok(())
	}

	fn write_metadata(&self, metadata: &TileSetMetadata) -> Result<()> {
		let optional = [
			("name", &metadata.name),
			("attribution", &metadata.attribution),
			("description", &metadata.description),
			("version", &metadata.version),
		];
		for (key, value) in optional {
			if let Some(value) = value {
				self.set_metadata(key, value)?;
			}
		}
		if let Some(bounds) = &metadata.bounds {
			self.set_metadata("bounds", &bounds.as_string_list())?;
		}
		if let Some(center) = &metadata.center {
			self.set_metadata("center", &center.as_string_list())?;
		}
		self.set_metadata("minzoom", &metadata.minzoom.to_string())?;
		self.set_metadata("maxzoom", &metadata.maxzoom.to_string())?;
		self.set_metadata("format", metadata.format.extension())?;
		self.set_metadata("compression", metadata.compression.as_str())?;
		self.set_metadata("type", "overlay")?;
		if !metadata.vector_layers.is_empty() {
			self.set_metadata("json", &metadata.vector_layers_json()?)?;
		}
		Ok(())
	}

	/// Materializes `source` at `path`, replacing any existing file. Returns the number of tiles written.
	pub fn write(path: &Path, source: &dyn TileSource) -> Result<u64> {
		Self::write_inner(path, source).with_context(|| format!("writing MBTiles to '{}'", path.display()))
	}

	fn write_inner(path: &Path, source: &dyn TileSource) -> Result<u64> {
		log::debug!("write '{}' to {path:?}", source.source_name());

		let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
		let temp = NamedTempFile::new_in(parent)?;
		let mut writer = MBTilesWriter::new(temp.path())?;

		let mut count = 0u64;
		let mut batch = Vec::with_capacity(BATCH_SIZE);
		for tile in source.iter_tiles()? {
			batch.push(tile?);
			if batch.len() >= BATCH_SIZE {
				writer.add_tiles(&batch)?;
				count += batch.len() as u64;
				batch.clear();
			}
		}
		writer.add_tiles(&batch)?;
		count += batch.len() as u64;

		writer.write_metadata(source.metadata())?;
		drop(writer);

		temp.persist(path)?;
		log::debug!("wrote {count} tiles to {path:?}");
		Ok(count)
	}
}
