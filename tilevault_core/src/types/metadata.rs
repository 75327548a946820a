//! Tileset metadata and its TileJSON form.
//!
//! [`TileSetMetadata`] deserializes from any TileJSON-like document: unknown keys are ignored and missing
//! keys fall back to defaults, so the `metadata.json` written next to exported tiles can be read back
//! as-is.

use super::{GeoBBox, GeoCenter, TileCompression, TileFormat, TileScheme};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

pub const TILEJSON_VERSION: &str = "3.0.0";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct VectorLayer {
	pub id: String,
	#[serde(default)]
	pub fields: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub minzoom: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub maxzoom: Option<u8>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TileSetMetadata {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub attribution: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub bounds: Option<GeoBBox>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub center: Option<GeoCenter>,
	pub minzoom: u8,
	pub maxzoom: u8,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub vector_layers: Vec<VectorLayer>,
	pub scheme: TileScheme,
	pub format: TileFormat,
	pub compression: TileCompression,
}

impl TileSetMetadata {
	pub fn from_json_str(text: &str) -> Result<TileSetMetadata> {
		serde_json::from_str(text).context("Failed to parse tileset metadata JSON")
	}

	pub fn zoom_range(&self) -> RangeInclusive<u8> {
		self.minzoom..=self.maxzoom
	}

	pub fn contains_level(&self, level: u8) -> bool {
		self.zoom_range().contains(&level)
	}

	/// Parses the `json` value of MBTiles metadata, `{"vector_layers": [...], ...}`.
	pub fn parse_vector_layers(text: &str) -> Result<Vec<VectorLayer>> {
		#[derive(Deserialize)]
		struct Wrapper {
			#[serde(default)]
			vector_layers: Vec<VectorLayer>,
		}
		let wrapper: Wrapper = serde_json::from_str(text).context("Failed to parse vector layers JSON")?;
		Ok(wrapper.vector_layers)
	}

	/// The value stored under the `json` key of MBTiles metadata.
	pub fn vector_layers_json(&self) -> Result<String> {
		Ok(serde_json::to_string(&json!({ "vector_layers": self.vector_layers }))?)
	}

	/// Builds the TileJSON document announced to clients. `tile_url` is the URL template with `{z}`,
	/// `{x}` and `{y}` placeholders.
	pub fn to_tilejson(&self, tile_url: &str) -> Result<Value> {
		let mut value = serde_json::to_value(self)?;
		if let Value::Object(object) = &mut value {
			object.insert("tilejson".to_string(), json!(TILEJSON_VERSION));
			object.insert("tiles".to_string(), json!([tile_url]));
		}
		Ok(value)
	}

	pub fn to_json_string(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}
