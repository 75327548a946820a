use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;

/// Payload format of the tiles in a tileset.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TileFormat {
	#[default]
	Mvt,
	Png,
	Jpg,
	Webp,
}

impl TileFormat {
	/// File extension without the dot, also the MBTiles `format` metadata value.
	pub fn extension(&self) -> &'static str {
		match self {
			TileFormat::Mvt => "pbf",
			TileFormat::Png => "png",
			TileFormat::Jpg => "jpg",
			TileFormat::Webp => "webp",
		}
	}

	pub fn content_type(&self) -> &'static str {
		match self {
			TileFormat::Mvt => "application/x-protobuf",
			TileFormat::Png => "image/png",
			TileFormat::Jpg => "image/jpeg",
			TileFormat::Webp => "image/webp",
		}
	}

	/// Whether a request path extension names this format. Vector tiles answer to `.pbf` and `.mvt`.
	pub fn matches_extension(&self, extension: &str) -> bool {
		TileFormat::parse_str(extension).is_ok_and(|format| format == *self)
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"pbf" | "mvt" => TileFormat::Mvt,
			"png" => TileFormat::Png,
			"jpg" | "jpeg" => TileFormat::Jpg,
			"webp" => TileFormat::Webp,
			_ => bail!("unknown tile format '{value}'"),
		})
	}

	/// Code stored in the archive header.
	pub fn as_u8(&self) -> u8 {
		match self {
			TileFormat::Mvt => 1,
			TileFormat::Png => 2,
			TileFormat::Jpg => 3,
			TileFormat::Webp => 4,
		}
	}

	pub fn from_u8(value: u8) -> Result<Self> {
		Ok(match value {
			1 => TileFormat::Mvt,
			2 => TileFormat::Png,
			3 => TileFormat::Jpg,
			4 => TileFormat::Webp,
			_ => bail!("unknown tile type code {value}"),
		})
	}
}

impl Display for TileFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.extension())
	}
}

impl Serialize for TileFormat {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.extension())
	}
}

impl<'de> Deserialize<'de> for TileFormat {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = String::deserialize(deserializer)?;
		TileFormat::parse_str(&value).map_err(serde::de::Error::custom)
	}
}
