//! Request handling independent of the HTTP framework: validation, lookup, content negotiation and headers.

use super::TileBackend;
use anyhow::Result;
use axum::{
	body::Body,
	http::{HeaderValue, StatusCode, header},
	response::{IntoResponse, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tilevault_core::{Blob, MAX_LEVEL, TileCompression, TileCoord, TileError, TileScheme, compression::decompress};

/// Outcome of a request, converted into an HTTP response by axum.
#[derive(Clone, Debug, PartialEq)]
pub struct TileResponse {
	pub status: StatusCode,
	pub body: Blob,
	pub content_type: String,
	pub content_encoding: Option<&'static str>,
	pub cache_control: Option<String>,
	/// Set when the body depends on `Accept-Encoding`.
	pub vary: bool,
}

impl TileResponse {
	pub fn text(status: StatusCode, message: &str) -> TileResponse {
		TileResponse {
			status,
			body: Blob::from(message),
			content_type: "text/plain; charset=utf-8".to_string(),
			content_encoding: None,
			cache_control: None,
			vary: false,
		}
	}

	pub fn bad_request(message: &str) -> TileResponse {
		Self::text(StatusCode::BAD_REQUEST, message)
	}

	pub fn not_found() -> TileResponse {
		Self::text(StatusCode::NOT_FOUND, "Not Found")
	}

	pub fn internal_error() -> TileResponse {
		Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
	}
}

impl IntoResponse for TileResponse {
	fn into_response(self) -> Response {
		let mut headers = vec![(header::CONTENT_TYPE, self.content_type)];
		if let Some(encoding) = self.content_encoding {
			headers.push((header::CONTENT_ENCODING, encoding.to_string()));
		}
		if let Some(cache_control) = self.cache_control {
			headers.push((header::CACHE_CONTROL, cache_control));
		}
		if self.vary {
			headers.push((header::VARY, "accept-encoding".to_string()));
		}

		let mut response = Response::new(Body::from(self.body.into_vec()));
		*response.status_mut() = self.status;
		for (name, value) in headers {
			match value.parse::<HeaderValue>() {
				Ok(value) => {
					response.headers_mut().insert(name, value);
				}
				Err(_) => log::warn!("dropping invalid {name} header value '{value}'"),
			}
		}
		response
	}
}

/// Answers tile and metadata requests from one [`TileBackend`].
#[derive(Debug)]
pub struct TileService {
	backend: Arc<dyn TileBackend>,
	public_url: String,
	tile_cache_control: String,
	metadata_cache_control: String,
}

impl TileService {
	pub fn new(backend: Arc<dyn TileBackend>) -> TileService {
		TileService {
			backend,
			public_url: String::new(),
			tile_cache_control: "public, max-age=2592000".to_string(),
			metadata_cache_control: "public, max-age=86400".to_string(),
		}
	}

	/// Base URL under which clients reach the tiles, e.g. `https://tiles.example.org`.
	pub fn with_public_url(mut self, public_url: &str) -> Self {
		self.public_url = public_url.trim_end_matches('/').to_string();
		self
	}

	pub fn with_cache_control(mut self, tiles: &str, metadata: &str) -> Self {
		self.tile_cache_control = tiles.to_string();
		self.metadata_cache_control = metadata.to_string();
		self
	}

	pub fn backend(&self) -> &Arc<dyn TileBackend> {
		&self.backend
	}

	/// Tile URL template announced in the TileJSON.
	pub fn tile_url(&self) -> String {
		let format = self.backend.metadata().format;
		format!("{}/{{z}}/{{x}}/{{y}}.{}", self.public_url, format.extension())
	}

	/// Serves the XYZ tile `z/x/y`.
	///
	/// Answers 400 for coordinates outside the pyramid or outside the declared zoom range and 404 for
	/// absent tiles. Stored encodings the client does not accept are removed before sending.
	pub async fn handle_tile(&self, z: u32, x: u64, y: u64, accept_encoding: Option<&str>) -> TileResponse {
		let coord = match self.check_coord(z, x, y) {
			Ok(coord) => coord,
			Err(message) => {
				log::debug!("reject tile {z}/{x}/{y}: {message}");
				return TileResponse::bad_request(&message);
			}
		};

		let tile = match self.backend.get_tile(coord).await {
			Ok(Some(tile)) => tile,
			Ok(None) => return TileResponse::not_found(),
			Err(error) => return error_response(&error, &format!("tile {z}/{x}/{y}")),
		};
		log::trace!("send tile {z}/{x}/{y}");

		let mut data = tile.data;
		let mut compression = tile.compression;
		if !compression.is_accepted_by(accept_encoding.unwrap_or("")) {
			data = match decompress(data, compression) {
				Ok(data) => data,
				Err(error) => return error_response(&error, &format!("decompressing tile {z}/{x}/{y}")),
			};
			compression = TileCompression::Uncompressed;
		}

		TileResponse {
			status: StatusCode::OK,
			body: data,
			content_type: self.backend.metadata().format.content_type().to_string(),
			content_encoding: compression.content_encoding(),
			cache_control: Some(self.tile_cache_control.clone()),
			vary: tile.compression != TileCompression::Uncompressed,
		}
	}

	fn check_coord(&self, z: u32, x: u64, y: u64) -> Result<TileCoord, String> {
		if z > u32::from(MAX_LEVEL) {
			return Err(format!("zoom level {z} is above {MAX_LEVEL}"));
		}
		let level = z as u8;
		let metadata = self.backend.metadata();
		if !metadata.contains_level(level) {
			return Err(format!(
				"zoom level {z} is outside {}..={}",
				metadata.minzoom, metadata.maxzoom
			));
		}
		let size = TileCoord::size(level);
		if x >= size || y >= size {
			return Err(format!("tile {x}/{y} is outside the {size}x{size} grid of zoom level {z}"));
		}
		TileCoord::new(level, x as u32, y as u32).map_err(|e| e.to_string())
	}

	/// TileJSON of the served tileset, pointing at [`TileService::tile_url`].
	pub fn handle_metadata(&self) -> Result<Value> {
		let mut metadata = (*self.backend.metadata()).clone();
		metadata.scheme = TileScheme::Xyz;
		metadata.to_tilejson(&self.tile_url())
	}

	pub(crate) fn metadata_response(&self) -> TileResponse {
		match self.handle_metadata().and_then(|json| Ok(serde_json::to_string(&json)?)) {
			Ok(json) => TileResponse {
				status: StatusCode::OK,
				body: Blob::from(json),
				content_type: "application/json".to_string(),
				content_encoding: None,
				cache_control: Some(self.metadata_cache_control.clone()),
				vary: false,
			},
			Err(error) => error_response(&error, "metadata"),
		}
	}
}

fn error_response(error: &anyhow::Error, what: &str) -> TileResponse {
	match TileError::find(error) {
		Some(TileError::NotFound(_)) => TileResponse::not_found(),
		Some(TileError::OutOfRange(_)) => TileResponse::bad_request("coordinate out of range"),
		_ => {
			log::warn!("send 500 for {what}: {error:#}");
			TileResponse::internal_error()
		}
	}
}
