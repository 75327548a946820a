//! Tile coordinates in a Web Mercator pyramid.
//!
//! A [`TileCoord`] does not know its own row convention; callers keep the [`TileScheme`] next to it and use
//! [`TileCoord::to_scheme`] whenever a coordinate crosses from a TMS store into the XYZ world or back.
//!
//! ```
//! use tilevault_core::{TileCoord, TileScheme};
//!
//! let tms = TileCoord::new(3, 2, 1).unwrap();
//! let xyz = tms.to_scheme(TileScheme::Tms, TileScheme::Xyz);
//! assert_eq!(xyz, TileCoord::new(3, 2, 6).unwrap());
//! assert_eq!(xyz.convert(), tms);
//! ```

use super::TileScheme;
use crate::TileError;
use anyhow::{Result, bail};
use std::fmt::{self, Debug, Display};

/// Highest zoom level whose row/column indices still fit into `u32`.
pub const MAX_LEVEL: u8 = 31;

#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Copy)]
pub struct TileCoord {
	pub level: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	/// Creates a coordinate, failing with [`TileError::OutOfRange`] unless `level <= 31` and
	/// `x, y < 2^level`.
	pub fn new(level: u8, x: u32, y: u32) -> Result<TileCoord> {
		if level > MAX_LEVEL {
			bail!(TileError::out_of_range(format!("level {level} must be <= {MAX_LEVEL}")));
		}
		let size = Self::size(level);
		if u64::from(x) >= size || u64::from(y) >= size {
			bail!(TileError::out_of_range(format!(
				"tile {level}/{x}/{y} is outside [0, {}]",
				size - 1
			)));
		}
		Ok(TileCoord { level, x, y })
	}

	/// Number of rows (and columns) at `level`.
	pub fn size(level: u8) -> u64 {
		1u64 << level
	}

	/// Flips the row between the southern and northern origin: `y' = 2^z - 1 - y`.
	///
	/// Applying it twice yields the original coordinate.
	#[must_use]
	pub fn convert(&self) -> TileCoord {
		TileCoord {
			level: self.level,
			x: self.x,
			y: (Self::size(self.level) - 1 - u64::from(self.y)) as u32,
		}
	}

	/// Converts a coordinate given in scheme `from` into scheme `to`.
	#[must_use]
	pub fn to_scheme(&self, from: TileScheme, to: TileScheme) -> TileCoord {
		if from == to { *self } else { self.convert() }
	}

	/// Pyramid address of an XYZ coordinate: tiles of all lower levels, plus the row-major position
	/// inside this level.
	#[must_use]
	pub fn tile_id(&self) -> u64 {
		let size = Self::size(self.level);
		let offset = (size * size - 1) / 3;
		offset + size * u64::from(self.y) + u64::from(self.x)
	}

	/// Inverse of [`TileCoord::tile_id`].
	pub fn from_tile_id(tile_id: u64) -> Result<TileCoord> {
		let mut offset = 0u64;
		for level in 0..=MAX_LEVEL {
			let size = Self::size(level);
			let count = size * size;
			if tile_id - offset < count {
				let index = tile_id - offset;
				return Ok(TileCoord {
					level,
					x: (index % size) as u32,
					y: (index / size) as u32,
				});
			}
			offset += count;
		}
		bail!(TileError::out_of_range(format!("tile id {tile_id} exceeds level {MAX_LEVEL}")))
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TileCoord({}, [{}, {}])", self.level, self.x, self.y)
	}
}

impl Display for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.level, self.x, self.y)
	}
}
