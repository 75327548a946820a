//! Content encoding of tile payloads and archive directories.
//!
//! ```
//! use tilevault_core::TileCompression;
//!
//! assert_eq!(TileCompression::parse_str("gz").unwrap(), TileCompression::Gzip);
//! assert_eq!(TileCompression::Brotli.content_encoding(), Some("br"));
//! assert!(TileCompression::Gzip.is_accepted_by("deflate, gzip;q=0.8"));
//! ```

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum TileCompression {
	#[default]
	Uncompressed,
	Gzip,
	Brotli,
}

impl TileCompression {
	pub fn as_str(&self) -> &'static str {
		match self {
			TileCompression::Uncompressed => "none",
			TileCompression::Gzip => "gzip",
			TileCompression::Brotli => "brotli",
		}
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"br" | "brotli" => TileCompression::Brotli,
			"gz" | "gzip" => TileCompression::Gzip,
			"none" | "raw" | "identity" | "" => TileCompression::Uncompressed,
			_ => bail!("unknown tile compression '{value}', expected brotli, gzip or none"),
		})
	}

	/// Value of the HTTP `Content-Encoding` header, `None` for identity.
	pub fn content_encoding(&self) -> Option<&'static str> {
		match self {
			TileCompression::Uncompressed => None,
			TileCompression::Gzip => Some("gzip"),
			TileCompression::Brotli => Some("br"),
		}
	}

	/// Whether a client sending this `Accept-Encoding` header can consume payloads in this encoding.
	pub fn is_accepted_by(&self, accept_encoding: &str) -> bool {
		let Some(encoding) = self.content_encoding() else {
			return true;
		};
		accept_encoding.split(',').any(|part| {
			let mut pieces = part.split(';');
			let name = pieces.next().unwrap_or("").trim();
			let refused = pieces.any(|p| matches!(p.trim(), "q=0" | "q=0.0" | "q=0.00" | "q=0.000"));
			(name.eq_ignore_ascii_case(encoding) || name == "*") && !refused
		})
	}

	/// Code stored in the archive header.
	pub fn as_u8(&self) -> u8 {
		match self {
			TileCompression::Uncompressed => 1,
			TileCompression::Gzip => 2,
			TileCompression::Brotli => 3,
		}
	}

	pub fn from_u8(value: u8) -> Result<Self> {
		Ok(match value {
			1 => TileCompression::Uncompressed,
			2 => TileCompression::Gzip,
			3 => TileCompression::Brotli,
			_ => bail!("unknown compression code {value}"),
		})
	}
}

impl Display for TileCompression {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Serialize for TileCompression {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for TileCompression {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = String::deserialize(deserializer)?;
		TileCompression::parse_str(&value).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("gzip", TileCompression::Gzip)]
	#[case("GZ", TileCompression::Gzip)]
	#[case("br", TileCompression::Brotli)]
	#[case("none", TileCompression::Uncompressed)]
	#[case("raw", TileCompression::Uncompressed)]
	fn parse(#[case] text: &str, #[case] expected: TileCompression) {
		assert_eq!(TileCompression::parse_str(text).unwrap(), expected);
	}

	#[test]
	fn parse_unknown() {
		assert!(TileCompression::parse_str("zstd").is_err());
	}

	#[rstest]
	#[case(TileCompression::Gzip, "gzip, deflate, br", true)]
	#[case(TileCompression::Gzip, "br", false)]
	#[case(TileCompression::Gzip, "", false)]
	#[case(TileCompression::Gzip, "*", true)]
	#[case(TileCompression::Gzip, "gzip;q=0, br", false)]
	#[case(TileCompression::Brotli, "gzip, br;q=0.9", true)]
	#[case(TileCompression::Uncompressed, "", true)]
	fn accept_encoding(#[case] compression: TileCompression, #[case] header: &str, #[case] accepted: bool) {
		assert_eq!(compression.is_accepted_by(header), accepted);
	}

	#[test]
	fn header_codes() {
		for compression in [TileCompression::Uncompressed, TileCompression::Gzip, TileCompression::Brotli] {
			assert_eq!(TileCompression::from_u8(compression.as_u8()).unwrap(), compression);
		}
		assert!(TileCompression::from_u8(0).is_err());
	}

	#[test]
	fn serde_uses_names() {
		assert_eq!(serde_json::to_string(&TileCompression::Gzip).unwrap(), "\"gzip\"");
		assert_eq!(
			serde_json::from_str::<TileCompression>("\"br\"").unwrap(),
			TileCompression::Brotli
		);
	}
}
