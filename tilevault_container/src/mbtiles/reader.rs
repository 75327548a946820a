//! Read tiles and metadata from an MBTiles (SQLite) database.
//!
//! Tiles live in `tiles(zoom_level, tile_column, tile_row, tile_data)` with TMS rows, metadata in
//! `metadata(name, value)`. Both may be views, as in deduplicated MBTiles files.
//!
//! The reader owns an `r2d2` pool of read-only connections. Full iteration pages through the table with
//! keyset queries: every page is a fresh query that resumes after the sort key of the previous page's last
//! row, so an iterator holds at most one page of tiles and no connection between pages.
//!
//! Metadata is parsed leniently: unknown keys are ignored, malformed values are logged and skipped, and a
//! missing zoom range is derived from the `tiles` table. `format = pbf` implies gzip encoded tiles unless a
//! `compression` key says otherwise.

use crate::{Tile, TileIterator, TileSource};
use anyhow::{Context, Result, bail};
use r2d2::Pool;
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{OpenFlags, OptionalExtension, params, types::ValueRef},
};
use std::{path::Path, vec};
use tilevault_core::*;

/// Rows fetched by one page query.
const PAGE_SIZE: usize = 256;

// Page queries select the tile and then its three-part sort key, and resume after the key bound to ?1..?3.
const SQL_NATIVE_ORDER: &str = "SELECT zoom_level, tile_column, tile_row, tile_data, zoom_level, rowid, 0 FROM tiles WHERE (zoom_level, rowid, 0) > (?1, ?2, ?3) ORDER BY zoom_level ASC, rowid ASC LIMIT ?4";
const SQL_NATIVE_ORDER_VIEW: &str = "SELECT zoom_level, tile_column, tile_row, tile_data, zoom_level, tile_column, tile_row FROM tiles WHERE (zoom_level, tile_column, tile_row) > (?1, ?2, ?3) ORDER BY zoom_level ASC, tile_column ASC, tile_row ASC LIMIT ?4";
const SQL_TILE_ID_ORDER: &str = "SELECT zoom_level, tile_column, tile_row, tile_data, zoom_level, -tile_row, tile_column FROM tiles WHERE (zoom_level, -tile_row, tile_column) > (?1, ?2, ?3) ORDER BY zoom_level ASC, tile_row DESC, tile_column ASC LIMIT ?4";

pub struct MBTilesReader {
	name: String,
	pool: Pool<SqliteConnectionManager>,
	metadata: TileSetMetadata,
	tiles_is_view: bool,
}

impl MBTilesReader {
	/// Opens `path` read-only.
	///
	/// Fails with [`TileError::NotFound`] if the file does not exist and with [`TileError::Corrupt`] if it
	/// is not an SQLite database or lacks the `tiles` or `metadata` table.
	pub fn open(path: &Path) -> Result<MBTilesReader> {
		Self::open_with_limits(path, ConcurrencyLimits::default())
			.with_context(|| format!("opening MBTiles at '{}'", path.display()))
	}

	pub fn open_with_limits(path: &Path, limits: ConcurrencyLimits) -> Result<MBTilesReader> {
		log::debug!("open {path:?}");

		if !path.is_file() {
			bail!(TileError::not_found(format!("file {path:?} does not exist")));
		}

		let manager = SqliteConnectionManager::file(path)
			.with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
		let pool = Pool::builder()
			.max_size(limits.readers as u32)
			.min_idle(Some(1))
			.build(manager)
			.context("creating SQLite connection pool")?;

		let mut reader = MBTilesReader {
			name: path.display().to_string(),
			pool,
			metadata: TileSetMetadata::default(),
			tiles_is_view: false,
		};

		reader.check_tables()?;
		reader.load_meta_data()?;

		Ok(reader)
	}

	fn check_tables(&mut self) -> Result<()> {
		let conn = self.pool.get()?;
		let mut stmt = conn
			.prepare("SELECT name, type FROM sqlite_master WHERE name IN ('tiles', 'metadata')")
			.map_err(|e| TileError::corrupt(format!("'{}' is not a readable SQLite database: {e}", self.name)))?;
		let objects = stmt
			.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
			.collect::<Result<Vec<_>, _>>()?;

		for table in ["tiles", "metadata"] {
			match objects.iter().find(|(name, _)| name == table) {
				Some((_, kind)) if kind == "table" || kind == "view" => {}
				_ => bail!(TileError::corrupt(format!(
					"'{}' has no '{table}' table",
					self.name
				))),
			}
		}

		self.tiles_is_view = objects.iter().any(|(name, kind)| name == "tiles" && kind == "view");
		Ok(())
	}

	fn load_meta_data(&mut self) -> Result<()> {
		log::debug!("load_meta_data");

		let conn = self.pool.get()?;
		let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
		let entries = stmt
			.query_map([], |row| Ok((value_as_string(row.get_ref(0)?), value_as_string(row.get_ref(1)?))))?
			.collect::<Result<Vec<_>, _>>()
			.context("reading metadata table")?;

		let mut metadata = TileSetMetadata {
			scheme: TileScheme::Tms,
			..Default::default()
		};
		let mut minzoom = None;
		let mut maxzoom = None;
		let mut compression = None;

		for (key, value) in entries {
			let (Some(key), Some(value)) = (key, value) else {
				continue;
			};
			let parsed = (|| -> Result<()> {
				match key.as_str() {
					"name" => metadata.name = Some(value.clone()),
					"attribution" => metadata.attribution = Some(value.clone()),
					"description" => metadata.description = Some(value.clone()),
					"version" => metadata.version = Some(value.clone()),
					"bounds" => metadata.bounds = Some(GeoBBox::parse_str(&value)?),
					"center" => metadata.center = Some(GeoCenter::parse_str(&value)?),
					"minzoom" => minzoom = Some(parse_level(&value)?),
					"maxzoom" => maxzoom = Some(parse_level(&value)?),
					"format" => metadata.format = TileFormat::parse_str(&value)?,
					"compression" => compression = Some(TileCompression::parse_str(&value)?),
					"json" => metadata.vector_layers = TileSetMetadata::parse_vector_layers(&value)?,
					_ => {}
				}
				Ok(())
			})();
			if let Err(error) = parsed {
				log::warn!("ignoring metadata '{key}' of '{}': {error:#}", self.name);
			}
		}

		metadata.compression = compression.unwrap_or(match metadata.format {
			TileFormat::Mvt => TileCompression::Gzip,
			_ => TileCompression::Uncompressed,
		});

		if minzoom.is_none() || maxzoom.is_none() {
			let (min, max) = self.zoom_range_from_tiles()?;
			minzoom = minzoom.or(min);
			maxzoom = maxzoom.or(max);
		}
		metadata.minzoom = minzoom.unwrap_or(0);
		metadata.maxzoom = maxzoom.unwrap_or(metadata.minzoom).max(metadata.minzoom);

		self.metadata = metadata;
		Ok(())
	}

	fn zoom_range_from_tiles(&self) -> Result<(Option<u8>, Option<u8>)> {
		let min = self.simple_query("MIN(zoom_level)")?;
		let max = self.simple_query("MAX(zoom_level)")?;
		let to_level = |value: Option<i64>| {
			value
				.and_then(|v| u8::try_from(v).ok())
				.filter(|level| *level <= MAX_LEVEL)
		};
		Ok((to_level(min), to_level(max)))
	}

	fn simple_query(&self, sql_value: &str) -> Result<Option<i64>> {
		let sql = format!("SELECT {sql_value} FROM tiles");
		log::trace!("SQL: {sql}");

		let conn = self.pool.get()?;
		let mut stmt = conn.prepare(&sql)?;
		Ok(stmt.query_row([], |row| row.get::<_, Option<i64>>(0))?)
	}

	/// Number of rows in `tiles`.
	pub fn count_tiles(&self) -> Result<u64> {
		Ok(self.simple_query("COUNT(*)")?.unwrap_or(0) as u64)
	}

	/// Pages through `sql` lazily and yields the rows as tiles in `scheme`.
	fn paged_tiles(&self, sql: &'static str, scheme: TileScheme) -> TileIterator {
		Box::new(PagedTiles {
			pool: self.pool.clone(),
			name: self.name.clone(),
			sql,
			scheme,
			compression: self.metadata.compression,
			next_key: Some([i64::MIN; 3]),
			page: Vec::new().into_iter(),
		})
	}
}

/// Lazy keyset pagination over the `tiles` table.
struct PagedTiles {
	pool: Pool<SqliteConnectionManager>,
	name: String,
	sql: &'static str,
	scheme: TileScheme,
	compression: TileCompression,
	/// Sort key the next page starts after. `None` once the table is exhausted.
	next_key: Option<[i64; 3]>,
	page: vec::IntoIter<Result<Tile>>,
}

impl PagedTiles {
	/// Runs one page query on a pooled connection, which is returned before this function does.
	fn fetch_page(&self, after: [i64; 3]) -> Result<(Vec<Result<Tile>>, Option<[i64; 3]>)> {
		log::trace!("SQL: {} after {after:?}", self.sql);
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare_cached(self.sql)?;
		let mut rows = stmt.query(params![after[0], after[1], after[2], PAGE_SIZE as i64])?;

		let mut tiles = Vec::with_capacity(PAGE_SIZE);
		let mut last_key = None;
		while let Some(row) = rows.next()? {
			last_key = Some([row.get(4)?, row.get(5)?, row.get(6)?]);
			let (level, x, y): (i64, i64, i64) = (row.get(0)?, row.get(1)?, row.get(2)?);
			let tile = tile_coord(level, x, y).and_then(|coord| {
				let data = Blob::from(row.get::<_, Vec<u8>>(3)?);
				Ok(Tile::new(coord, TileScheme::Tms, data, self.compression).to_scheme(self.scheme))
			});
			tiles.push(tile);
		}

		let next_key = if tiles.len() < PAGE_SIZE { None } else { last_key };
		Ok((tiles, next_key))
	}
}

impl Iterator for PagedTiles {
	type Item = Result<Tile>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			if let Some(tile) = self.page.next() {
				return Some(tile);
			}
			let after = self.next_key?;
			match self.fetch_page(after) {
				Ok((tiles, next_key)) => {
					self.page = tiles.into_iter();
					self.next_key = next_key;
				}
				Err(error) => {
					self.next_key = None;
					return Some(Err(error.context(format!("iterating tiles of '{}'", self.name))));
				}
			}
		}
	}
}

fn parse_level(value: &str) -> Result<u8> {
	let level = value.trim().parse::<u8>()?;
	if level > MAX_LEVEL {
		bail!("zoom level {level} is above {MAX_LEVEL}");
	}
	Ok(level)
}

fn value_as_string(value: ValueRef<'_>) -> Option<String> {
	match value {
		ValueRef::Null | ValueRef::Blob(_) => None,
		ValueRef::Integer(number) => Some(number.to_string()),
		ValueRef::Real(number) => Some(number.to_string()),
		ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
	}
}

fn tile_coord(level: i64, x: i64, y: i64) -> Result<TileCoord> {
	match (u8::try_from(level), u32::try_from(x), u32::try_from(y)) {
		(Ok(level), Ok(x), Ok(y)) => TileCoord::new(level, x, y),
		_ => bail!(TileError::corrupt(format!("invalid tile row {level}/{x}/{y}"))),
	}
}

impl TileSource for MBTilesReader {
	fn source_name(&self) -> &str {
		&self.name
	}

	fn metadata(&self) -> &TileSetMetadata {
		&self.metadata
	}

	fn get_tile(&self, coord: &TileCoord, scheme: TileScheme) -> Result<Option<Tile>> {
		let tms = coord.to_scheme(scheme, TileScheme::Tms);
		log::trace!("read tile {tms:?} from '{}'", self.name);

		let conn = self.pool.get()?;
		let mut stmt =
			conn.prepare_cached("SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3")?;
		let data = stmt
			.query_row(params![tms.level, tms.x, tms.y], |row| row.get::<_, Vec<u8>>(0))
			.optional()
			.with_context(|| format!("fetching tile {tms} from '{}'", self.name))?;

		Ok(data.map(|data| {
			Tile::new(tms, TileScheme::Tms, Blob::from(data), self.metadata.compression).to_scheme(scheme)
		}))
	}

	fn iter_tiles(&self) -> Result<TileIterator> {
		let sql = if self.tiles_is_view {
			SQL_NATIVE_ORDER_VIEW
		} else {
			SQL_NATIVE_ORDER
		};
		Ok(self.paged_tiles(sql, TileScheme::Tms))
	}

	fn iter_tiles_by_id(&self) -> Result<TileIterator> {
		Ok(self.paged_tiles(SQL_TILE_ID_ORDER, TileScheme::Xyz))
	}
}

impl std::fmt::Debug for MBTilesReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesReader")
			.field("name", &self.name)
			.field("metadata", &self.metadata)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{metadata, pyramid, write_mbtiles};
	use assert_fs::TempDir;
	use pretty_assertions::assert_eq;
	use r2d2_sqlite::rusqlite::Connection;

	#[test]
	fn missing_file_is_not_found() {
		let dir = TempDir::new().unwrap();
		let error = MBTilesReader::open(&dir.path().join("nope.mbtiles")).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::NotFound(_))));
	}

	#[test]
	fn missing_tables_are_corrupt() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("broken.mbtiles");
		Connection::open(&path)
			.unwrap()
			.execute_batch("CREATE TABLE metadata (name TEXT, value TEXT);")
			.unwrap();
		let error = MBTilesReader::open(&path).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::Corrupt(_))));
	}

	#[test]
	fn garbage_file_is_corrupt() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("garbage.mbtiles");
		std::fs::write(&path, vec![42u8; 4096]).unwrap();
		let error = MBTilesReader::open(&path).unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::Corrupt(_))));
	}

	#[test]
	fn metadata_is_lenient() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("lenient.mbtiles");
		let conn = Connection::open(&path).unwrap();
		conn
			.execute_batch(
				"CREATE TABLE metadata (name TEXT, value TEXT);
				CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
				INSERT INTO metadata VALUES ('name', 'PLSS'), ('bounds', 'not,a,bbox'), ('format', 'pbf'), ('json', '{\"vector_layers\":[{\"id\":\"sections\"}]}'), ('bogus', NULL);
				INSERT INTO tiles VALUES (3, 0, 0, x'00'), (5, 0, 0, x'01');",
			)
			.unwrap();
		drop(conn);

		let reader = MBTilesReader::open(&path).unwrap();
		let metadata = reader.metadata();
		assert_eq!(metadata.name.as_deref(), Some("PLSS"));
		assert_eq!(metadata.bounds, None);
		assert_eq!(metadata.zoom_range(), 3..=5);
		assert_eq!(metadata.format, TileFormat::Mvt);
		assert_eq!(metadata.compression, TileCompression::Gzip);
		assert_eq!(metadata.scheme, TileScheme::Tms);
		assert_eq!(metadata.vector_layers[0].id, "sections");
		assert_eq!(reader.count_tiles().unwrap(), 2);
	}

	#[test]
	fn get_tile_converts_rows() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("pyramid.mbtiles");
		write_mbtiles(&path, &pyramid(0, 3), &metadata(0, 3))?;
		let reader = MBTilesReader::open(&path)?;

		let xyz = TileCoord::new(3, 2, 1)?;
		let tile = reader.get_tile(&xyz, TileScheme::Xyz)?.unwrap();
		assert_eq!(tile.coord, xyz);
		assert_eq!(tile.data, crate::testing::payload(&xyz));

		let via_tms = reader.get_tile(&xyz.convert(), TileScheme::Tms)?.unwrap();
		assert_eq!(via_tms.data, tile.data);
		assert_eq!(via_tms.coord, xyz.convert());
		Ok(())
	}

	#[test]
	fn get_tile_absent() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("pyramid.mbtiles");
		write_mbtiles(&path, &pyramid(0, 1), &metadata(0, 1))?;
		let reader = MBTilesReader::open(&path)?;
		assert!(reader.get_tile(&TileCoord::new(5, 0, 0)?, TileScheme::Xyz)?.is_none());
		Ok(())
	}

	#[test]
	fn iter_tiles_is_restartable_and_ordered() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("pyramid.mbtiles");
		write_mbtiles(&path, &pyramid(0, 4), &metadata(0, 4))?;
		let reader = MBTilesReader::open(&path)?;

		let first: Vec<Tile> = reader.iter_tiles()?.collect::<Result<_>>()?;
		let second: Vec<Tile> = reader.iter_tiles()?.collect::<Result<_>>()?;
		assert_eq!(first.len(), 1 + 4 + 16 + 64 + 256);
		assert_eq!(first, second);
		assert!(first.windows(2).all(|w| w[0].coord.level <= w[1].coord.level));
		assert!(first.iter().all(|t| t.scheme == TileScheme::Tms));
		Ok(())
	}

	#[test]
	fn iter_tiles_by_id_is_ascending() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("pyramid.mbtiles");
		write_mbtiles(&path, &pyramid(0, 4), &metadata(0, 4))?;
		let reader = MBTilesReader::open(&path)?;

		let ids: Vec<u64> = reader.iter_tiles_by_id()?.map(|t| t.map(|t| t.coord.tile_id())).collect::<Result<_>>()?;
		assert_eq!(ids, (0..341).collect::<Vec<u64>>());
		Ok(())
	}

	#[test]
	fn iterators_hold_no_connection_between_pages() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("pyramid.mbtiles");
		write_mbtiles(&path, &pyramid(0, 5), &metadata(0, 5))?;
		let reader = MBTilesReader::open_with_limits(&path, ConcurrencyLimits::new(1, 1))?;

		let mut tiles = reader.iter_tiles_by_id()?;
		let some: Vec<Tile> = tiles.by_ref().take(PAGE_SIZE + 3).collect::<Result<_>>()?;
		assert_eq!(some.len(), PAGE_SIZE + 3);
		// the only pooled connection is free while the iterator is paused
		assert!(reader.get_tile(&TileCoord::new(0, 0, 0)?, TileScheme::Xyz)?.is_some());
		assert_eq!(tiles.count(), 1365 - PAGE_SIZE - 3);

		let mut tiles = reader.iter_tiles()?;
		assert!(tiles.next().is_some());
		drop(tiles);
		assert!(reader.get_tile(&TileCoord::new(5, 31, 31)?, TileScheme::Xyz)?.is_some());
		Ok(())
	}

	#[test]
	fn view_order_pages_by_coordinates() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("view.mbtiles");
		let conn = Connection::open(&path)?;
		conn.execute_batch(
			"CREATE TABLE metadata (name TEXT, value TEXT);
			CREATE TABLE map (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_id TEXT);
			CREATE TABLE images (tile_id TEXT, tile_data BLOB);
			CREATE VIEW tiles AS SELECT map.zoom_level AS zoom_level, map.tile_column AS tile_column, map.tile_row AS tile_row, images.tile_data AS tile_data FROM map JOIN images ON images.tile_id = map.tile_id;
			INSERT INTO images VALUES ('a', x'00');",
		)?;
		for level in 0..=4u32 {
			for x in 0..(1 << level) {
				for y in 0..(1 << level) {
					conn.execute("INSERT INTO map VALUES (?1, ?2, ?3, 'a')", params![level, x, y])?;
				}
			}
		}
		drop(conn);

		let reader = MBTilesReader::open(&path)?;
		let coords: Vec<(u8, u32, u32)> = reader
			.iter_tiles()?
			.map(|t| t.map(|t| (t.coord.level, t.coord.x, t.coord.y)))
			.collect::<Result<_>>()?;
		assert_eq!(coords.len(), 341);
		assert!(coords.windows(2).all(|w| w[0] < w[1]));
		Ok(())
	}

	#[test]
	fn zoom_levels_above_the_pyramid_are_ignored() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("deep.mbtiles");
		let conn = Connection::open(&path).unwrap();
		conn
			.execute_batch(
				"CREATE TABLE metadata (name TEXT, value TEXT);
				CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
				INSERT INTO metadata VALUES ('minzoom', '2'), ('maxzoom', '40');
				INSERT INTO tiles VALUES (2, 0, 0, x'00'), (6, 0, 0, x'01');",
			)
			.unwrap();
		drop(conn);

		let reader = MBTilesReader::open(&path).unwrap();
		assert_eq!(reader.metadata().zoom_range(), 2..=6);
	}
}
