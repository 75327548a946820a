use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Which edge of the map row 0 sits on.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileScheme {
	/// Row 0 is the southern edge. Used by MBTiles tables.
	Tms,
	/// Row 0 is the northern edge. Used by web maps, URLs and the indexed archive.
	#[default]
	Xyz,
}

impl TileScheme {
	pub fn as_str(&self) -> &'static str {
		match self {
			TileScheme::Tms => "tms",
			TileScheme::Xyz => "xyz",
		}
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.trim().to_lowercase().as_str() {
			"tms" => TileScheme::Tms,
			"xyz" => TileScheme::Xyz,
			_ => bail!("unknown tile scheme '{value}', expected 'tms' or 'xyz'"),
		})
	}
}

impl Display for TileScheme {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
