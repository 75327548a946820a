//! Geographic bounds and center of a tileset, in WGS84 degrees.
//!
//! Both serialize as plain JSON arrays, the way TileJSON and MBTiles metadata write them, and both
//! convert to and from the `i32` values scaled by 10^7 that the archive header stores.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Debug;

const E7: f64 = 10_000_000.0;

fn to_e7(value: f64) -> i32 {
	(value * E7).round() as i32
}

fn from_e7(value: i32) -> f64 {
	f64::from(value) / E7
}

/// `[west, south, east, north]`
#[derive(Clone, Copy, PartialEq)]
pub struct GeoBBox {
	pub x_min: f64,
	pub y_min: f64,
	pub x_max: f64,
	pub y_max: f64,
}

impl GeoBBox {
	pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<GeoBBox> {
		GeoBBox {
			x_min,
			y_min,
			x_max,
			y_max,
		}
		.checked()
	}

	/// The whole Web Mercator world.
	pub fn world() -> GeoBBox {
		GeoBBox {
			x_min: -180.0,
			y_min: -85.051_128_779_806_59,
			x_max: 180.0,
			y_max: 85.051_128_779_806_59,
		}
	}

	/// Parses the comma separated form used in MBTiles metadata: `"-180,-85,180,85"`.
	pub fn parse_str(value: &str) -> Result<GeoBBox> {
		let numbers = value
			.split(',')
			.map(|part| part.trim().parse::<f64>())
			.collect::<Result<Vec<f64>, _>>()
			.with_context(|| format!("invalid bounds '{value}'"))?;
		ensure!(numbers.len() == 4, "bounds '{value}' must have 4 numbers");
		GeoBBox::new(numbers[0], numbers[1], numbers[2], numbers[3])
	}

	pub fn as_array(&self) -> [f64; 4] {
		[self.x_min, self.y_min, self.x_max, self.y_max]
	}

	pub fn as_string_list(&self) -> String {
		format!("{},{},{},{}", self.x_min, self.y_min, self.x_max, self.y_max)
	}

	pub fn extend(&mut self, other: &GeoBBox) {
		self.x_min = self.x_min.min(other.x_min);
		self.y_min = self.y_min.min(other.y_min);
		self.x_max = self.x_max.max(other.x_max);
		self.y_max = self.y_max.max(other.y_max);
	}

	pub fn as_e7(&self) -> [i32; 4] {
		self.as_array().map(to_e7)
	}

	pub fn from_e7(values: [i32; 4]) -> Result<GeoBBox> {
		let [x_min, y_min, x_max, y_max] = values.map(from_e7);
		GeoBBox::new(x_min, y_min, x_max, y_max)
	}

	fn checked(self) -> Result<Self> {
		ensure!(self.x_min >= -180., "x_min ({}) must be >= -180", self.x_min);
		ensure!(self.y_min >= -90., "y_min ({}) must be >= -90", self.y_min);
		ensure!(self.x_max <= 180., "x_max ({}) must be <= 180", self.x_max);
		ensure!(self.y_max <= 90., "y_max ({}) must be <= 90", self.y_max);
		ensure!(self.x_min <= self.x_max, "x_min ({}) must be <= x_max ({})", self.x_min, self.x_max);
		ensure!(self.y_min <= self.y_max, "y_min ({}) must be <= y_max ({})", self.y_min, self.y_max);
		Ok(self)
	}
}

impl Debug for GeoBBox {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "GeoBBox({}, {}, {}, {})", self.x_min, self.y_min, self.x_max, self.y_max)
	}
}

impl Serialize for GeoBBox {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.as_array().serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for GeoBBox {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let [x_min, y_min, x_max, y_max] = <[f64; 4]>::deserialize(deserializer)?;
		GeoBBox::new(x_min, y_min, x_max, y_max).map_err(serde::de::Error::custom)
	}
}

/// `[lon, lat, zoom]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoCenter {
	pub lon: f64,
	pub lat: f64,
	pub zoom: u8,
}

impl GeoCenter {
	/// Parses `"lon,lat,zoom"`; the zoom part is optional.
	pub fn parse_str(value: &str) -> Result<GeoCenter> {
		let parts: Vec<&str> = value.split(',').map(str::trim).collect();
		ensure!(
			parts.len() == 2 || parts.len() == 3,
			"center '{value}' must have 2 or 3 numbers"
		);
		let number = |part: &str| part.parse::<f64>().with_context(|| format!("invalid center '{value}'"));
		Ok(GeoCenter {
			lon: number(parts[0])?,
			lat: number(parts[1])?,
			zoom: match parts.get(2) {
				Some(zoom) => number(zoom)?.round().clamp(0.0, 31.0) as u8,
				None => 0,
			},
		})
	}

	pub fn as_string_list(&self) -> String {
		format!("{},{},{}", self.lon, self.lat, self.zoom)
	}

	pub fn as_e7(&self) -> [i32; 2] {
		[to_e7(self.lon), to_e7(self.lat)]
	}

	pub fn from_e7(values: [i32; 2], zoom: u8) -> GeoCenter {
		GeoCenter {
			lon: from_e7(values[0]),
			lat: from_e7(values[1]),
			zoom,
		}
	}
}

impl Serialize for GeoCenter {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		(self.lon, self.lat, self.zoom).serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for GeoCenter {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let values = Vec::<f64>::deserialize(deserializer)?;
		match values.as_slice() {
			[lon, lat] => Ok(GeoCenter {
				lon: *lon,
				lat: *lat,
				zoom: 0,
			}),
			[lon, lat, zoom] => Ok(GeoCenter {
				lon: *lon,
				lat: *lat,
				zoom: zoom.round().clamp(0.0, 31.0) as u8,
			}),
			_ => Err(serde::de::Error::custom("center must have 2 or 3 numbers")),
		}
	}
}
