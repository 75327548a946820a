//! Combine several tile sources, each contributing a band of zoom levels, into one pyramid.
//!
//! Every input declares the zoom range it is responsible for; tiles outside that range are ignored. Inputs
//! may declare intersecting ranges as long as they never emit the same coordinate. [`merge`] verifies that
//! up front by streaming the shared levels of all inputs in tile id order, and the merged iterator checks
//! again while it runs.

use crate::{Tile, TileIterator, TileSource};
use anyhow::{Result, bail, ensure};
use itertools::Itertools;
use std::{fmt::Debug, ops::RangeInclusive, sync::Arc};
use tilevault_core::{MAX_LEVEL, TileCoord, TileError, TileScheme, TileSetMetadata};

#[derive(Clone, Debug)]
pub struct MergeInput {
	pub source: Arc<dyn TileSource>,
	pub min_zoom: u8,
	pub max_zoom: u8,
}

impl MergeInput {
	pub fn new(source: Arc<dyn TileSource>, min_zoom: u8, max_zoom: u8) -> Result<MergeInput> {
		if min_zoom > max_zoom || max_zoom > MAX_LEVEL {
			bail!(TileError::out_of_range(format!(
				"invalid zoom range {min_zoom}..={max_zoom} for '{}'",
				source.source_name()
			)));
		}
		Ok(MergeInput {
			source,
			min_zoom,
			max_zoom,
		})
	}

	/// Takes the whole declared zoom range of `source`.
	pub fn whole(source: Arc<dyn TileSource>) -> Result<MergeInput> {
		let (min_zoom, max_zoom) = (source.metadata().minzoom, source.metadata().maxzoom);
		Self::new(source, min_zoom, max_zoom)
	}

	pub fn zoom_range(&self) -> RangeInclusive<u8> {
		self.min_zoom..=self.max_zoom
	}

	/// Tiles of this input, ascending by tile id, restricted to the levels for which `keep` is true.
	fn tiles_by_id(&self, keep: [bool; MAX_LEVEL as usize + 1]) -> Result<TileIterator> {
		let range = self.zoom_range();
		let Some(last_level) = range.clone().rev().find(|level| keep[*level as usize]) else {
			return Ok(Box::new(std::iter::empty()));
		};
		let tiles = self
			.source
			.iter_tiles_by_id()?
			.take_while(move |tile| match tile {
				Ok(tile) => tile.coord.level <= last_level,
				Err(_) => true,
			})
			.filter(move |tile| match tile {
				Ok(tile) => range.contains(&tile.coord.level) && keep[tile.coord.level as usize],
				Err(_) => true,
			});
		Ok(Box::new(tiles))
	}
}

/// The union of several [`MergeInput`]s, readable as one XYZ [`TileSource`].
#[derive(Debug)]
pub struct MergedTileSet {
	name: String,
	inputs: Vec<MergeInput>,
	metadata: TileSetMetadata,
}

/// Checks the inputs for overlapping tiles and returns their union.
///
/// Fails with [`TileError::Overlap`] if two inputs with intersecting zoom ranges emit the same coordinate,
/// and with [`TileError::Corrupt`] if the inputs disagree on tile compression.
pub fn merge(inputs: Vec<MergeInput>) -> Result<MergedTileSet> {
	ensure!(!inputs.is_empty(), "nothing to merge");
	log::debug!(
		"merge {}",
		inputs
			.iter()
			.map(|i| format!("'{}' {:?}", i.source.source_name(), i.zoom_range()))
			.join(", ")
	);

	let compression = inputs[0].source.metadata().compression;
	let format = inputs[0].source.metadata().format;
	for input in &inputs[1..] {
		let metadata = input.source.metadata();
		if metadata.compression != compression {
			bail!(TileError::corrupt(format!(
				"'{}' holds {} tiles, '{}' holds {} tiles",
				inputs[0].source.source_name(),
				compression,
				input.source.source_name(),
				metadata.compression
			)));
		}
		if metadata.format != format {
			log::warn!(
				"'{}' declares {:?} tiles, '{}' declares {:?}",
				inputs[0].source.source_name(),
				format,
				input.source.source_name(),
				metadata.format
			);
		}
	}

	check_overlap(&inputs)?;

	let name = inputs.iter().map(|i| i.source.source_name()).join("+");
	let metadata = union_metadata(&inputs);
	Ok(MergedTileSet {
		name,
		inputs,
		metadata,
	})
}

/// Streams every zoom level claimed by two or more inputs and fails on the first duplicate tile id.
fn check_overlap(inputs: &[MergeInput]) -> Result<()> {
	let mut claims = [0usize; MAX_LEVEL as usize + 1];
	for input in inputs {
		for level in input.zoom_range() {
			claims[level as usize] += 1;
		}
	}
	let shared = claims.map(|count| count > 1);
	if !shared.contains(&true) {
		return Ok(());
	}
	log::debug!(
		"checking shared zoom levels {:?} for overlaps",
		(0..=MAX_LEVEL).filter(|l| shared[*l as usize]).collect::<Vec<_>>()
	);

	let streams = inputs
		.iter()
		.map(|input| input.tiles_by_id(shared))
		.collect::<Result<Vec<_>>>()?;
	let mut checked = 0u64;
	for tile in without_duplicates(streams) {
		tile?;
		checked += 1;
	}
	log::debug!("no overlaps among {checked} tiles on shared levels");
	Ok(())
}

fn union_metadata(inputs: &[MergeInput]) -> TileSetMetadata {
	let first = inputs[0].source.metadata();
	let mut metadata = TileSetMetadata {
		scheme: TileScheme::Xyz,
		format: first.format,
		compression: first.compression,
		minzoom: inputs.iter().map(|i| i.min_zoom).min().unwrap_or(0),
		maxzoom: inputs.iter().map(|i| i.max_zoom).max().unwrap_or(0),
		..Default::default()
	};

	for input in inputs {
		let source = input.source.metadata();
		metadata.name = metadata.name.take().or_else(|| source.name.clone());
		metadata.attribution = metadata.attribution.take().or_else(|| source.attribution.clone());
		metadata.description = metadata.description.take().or_else(|| source.description.clone());
		metadata.version = metadata.version.take().or_else(|| source.version.clone());
		metadata.center = metadata.center.take().or(source.center);

		if let Some(bounds) = &source.bounds {
			match &mut metadata.bounds {
				Some(union) => union.extend(bounds),
				None => metadata.bounds = Some(*bounds),
			}
		}
		for layer in &source.vector_layers {
			if !metadata.vector_layers.iter().any(|known| known.id == layer.id) {
				metadata.vector_layers.push(layer.clone());
			}
		}
	}
	metadata
}

/// k-way merge of ascending tile streams that stops with [`TileError::Overlap`] on a repeated tile id.
fn without_duplicates(streams: Vec<TileIterator>) -> impl Iterator<Item = Result<Tile>> + Send {
	let mut last = None;
	let mut failed = false;
	streams
		.into_iter()
		.kmerge_by(|a: &Result<Tile>, b: &Result<Tile>| match (a, b) {
			(Ok(a), Ok(b)) => a.tile_id() < b.tile_id(),
			(Err(_), _) => true,
			(Ok(_), Err(_)) => false,
		})
		.map_while(move |tile| {
			if failed {
				return None;
			}
			let checked = tile.and_then(|tile| {
				let id = tile.tile_id();
				if last == Some(id) {
					bail!(TileError::Overlap(format!(
						"tile {} is provided by more than one input",
						tile.xyz_coord()
					)));
				}
				last = Some(id);
				Ok(tile)
			});
			failed = checked.is_err();
			Some(checked)
		})
}

impl MergedTileSet {
	pub fn inputs(&self) -> &[MergeInput] {
		&self.inputs
	}
}

impl TileSource for MergedTileSet {
	fn source_name(&self) -> &str {
		&self.name
	}

	fn metadata(&self) -> &TileSetMetadata {
		&self.metadata
	}

	fn get_tile(&self, coord: &TileCoord, scheme: TileScheme) -> Result<Option<Tile>> {
		let level = coord.level;
		for input in self.inputs.iter().filter(|i| i.zoom_range().contains(&level)) {
			if let Some(tile) = input.source.get_tile(coord, scheme)? {
				return Ok(Some(tile));
			}
		}
		Ok(None)
	}

	fn iter_tiles(&self) -> Result<TileIterator> {
		let all = [true; MAX_LEVEL as usize + 1];
		let streams = self
			.inputs
			.iter()
			.map(|input| input.tiles_by_id(all))
			.collect::<Result<Vec<_>>>()?;
		Ok(Box::new(without_duplicates(streams)))
	}

	fn iter_tiles_by_id(&self) -> Result<TileIterator> {
		self.iter_tiles()
	}
}
