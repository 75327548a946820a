//! The [`TileSource`] trait implemented by every readable tileset, plus the in-memory [`TileSet`].

use crate::Tile;
use anyhow::Result;
use std::{collections::HashMap, fmt::Debug};
use tilevault_core::{TileCoord, TileScheme, TileSetMetadata};

/// Lazy sequence of tiles. Each call to an `iter_*` method returns a fresh one.
pub type TileIterator = Box<dyn Iterator<Item = Result<Tile>> + Send>;

pub trait TileSource: Debug + Send + Sync {
	/// Human readable origin, used in log and error messages.
	fn source_name(&self) -> &str;

	fn metadata(&self) -> &TileSetMetadata;

	/// Row scheme in which this source yields tiles from [`TileSource::iter_tiles`].
	fn scheme(&self) -> TileScheme {
		self.metadata().scheme
	}

	/// Looks up one tile. `coord` is interpreted in `scheme` and converted to the native scheme first;
	/// the returned tile is expressed in `scheme` as well.
	fn get_tile(&self, coord: &TileCoord, scheme: TileScheme) -> Result<Option<Tile>>;

	/// All tiles in native order and native scheme.
	fn iter_tiles(&self) -> Result<TileIterator>;

	/// All tiles ordered by ascending tile id, in [`TileScheme::Xyz`].
	fn iter_tiles_by_id(&self) -> Result<TileIterator>;
}

/// A tileset held in memory. Handy for small pyramids, fixtures and tests.
#[derive(Clone, Debug)]
pub struct TileSet {
	name: String,
	metadata: TileSetMetadata,
	tiles: Vec<Tile>,
	index: HashMap<TileCoord, usize>,
}

impl TileSet {
	/// Creates a tileset whose native scheme is `metadata.scheme`. Tiles given in another scheme are
	/// converted, later duplicates replace earlier ones and the native order is ascending zoom level.
	pub fn new(name: &str, metadata: TileSetMetadata, tiles: Vec<Tile>) -> TileSet {
		let scheme = metadata.scheme;
		let mut set = TileSet {
			name: name.to_string(),
			metadata,
			tiles: Vec::with_capacity(tiles.len()),
			index: HashMap::new(),
		};
		for tile in tiles {
			set.insert(tile.to_scheme(scheme));
		}
		set.tiles.sort_by_key(|tile| tile.coord.level);
		set.reindex();
		set
	}

	fn insert(&mut self, tile: Tile) {
		if let Some(&position) = self.index.get(&tile.coord) {
			self.tiles[position] = tile;
		} else {
			self.index.insert(tile.coord, self.tiles.len());
			self.tiles.push(tile);
		}
	}

	fn reindex(&mut self) {
		self.index = self.tiles.iter().enumerate().map(|(i, tile)| (tile.coord, i)).collect();
	}

	pub fn len(&self) -> usize {
		self.tiles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tiles.is_empty()
	}

	pub fn tiles(&self) -> &[Tile] {
		&self.tiles
	}
}

impl TileSource for TileSet {
	fn source_name(&self) -> &str {
		&self.name
	}

	fn metadata(&self) -> &TileSetMetadata {
		&self.metadata
	}

	fn get_tile(&self, coord: &TileCoord, scheme: TileScheme) -> Result<Option<Tile>> {
		let native = coord.to_scheme(scheme, self.scheme());
		Ok(self.index.get(&native).map(|&i| self.tiles[i].clone().to_scheme(scheme)))
	}

	fn iter_tiles(&self) -> Result<TileIterator> {
		Ok(Box::new(self.tiles.clone().into_iter().map(Ok)))
	}

	fn iter_tiles_by_id(&self) -> Result<TileIterator> {
		let mut tiles: Vec<Tile> = self.tiles.iter().map(|tile| tile.clone().to_scheme(TileScheme::Xyz)).collect();
		tiles.sort_by_key(|tile| tile.coord.tile_id());
		Ok(Box::new(tiles.into_iter().map(Ok)))
	}
}
