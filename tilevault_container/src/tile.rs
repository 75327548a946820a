use anyhow::Result;
use tilevault_core::{Blob, TileCompression, TileCoord, TileScheme, compression::decompress};

/// One tile: coordinate in a known row scheme, opaque payload and its content encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
	pub coord: TileCoord,
	pub scheme: TileScheme,
	pub data: Blob,
	pub compression: TileCompression,
}

impl Tile {
	pub fn new(coord: TileCoord, scheme: TileScheme, data: Blob, compression: TileCompression) -> Tile {
		Tile {
			coord,
			scheme,
			data,
			compression,
		}
	}

	/// Re-expresses the coordinate in `scheme`. The payload is untouched.
	pub fn to_scheme(mut self, scheme: TileScheme) -> Tile {
		self.coord = self.coord.to_scheme(self.scheme, scheme);
		self.scheme = scheme;
		self
	}

	pub fn xyz_coord(&self) -> TileCoord {
		self.coord.to_scheme(self.scheme, TileScheme::Xyz)
	}

	pub fn tile_id(&self) -> u64 {
		self.xyz_coord().tile_id()
	}

	/// Payload with the content encoding removed.
	pub fn decompressed(&self) -> Result<Blob> {
		decompress(self.data.clone(), self.compression)
	}
}
