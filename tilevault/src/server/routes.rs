//! Router composition: `/status`, `/metadata.json` and `/{z}/{x}/{y}.{ext}`.

use super::{TileResponse, TileService};
use axum::{
	Router,
	extract::{Path, State},
	http::{HeaderMap, header::ACCEPT_ENCODING},
	response::IntoResponse,
	routing::get,
};
use std::sync::Arc;

pub fn router(service: Arc<TileService>) -> Router {
	Router::new()
		.route("/status", get(|| async { "ready!" }))
		.route("/metadata.json", get(serve_metadata))
		.route("/{z}/{x}/{file}", get(serve_tile))
		.fallback(|| async { TileResponse::not_found() })
		.with_state(service)
}

async fn serve_metadata(State(service): State<Arc<TileService>>) -> impl IntoResponse {
	log::debug!("handle metadata request");
	service.metadata_response()
}

async fn serve_tile(
	Path((z, x, file)): Path<(String, String, String)>,
	headers: HeaderMap,
	State(service): State<Arc<TileService>>,
) -> impl IntoResponse {
	log::trace!("handle tile request: {z}/{x}/{file}");

	let Some((y, extension)) = file.split_once('.') else {
		return TileResponse::not_found();
	};
	if !service.backend().metadata().format.matches_extension(extension) {
		log::debug!("no tiles with extension '{extension}'");
		return TileResponse::not_found();
	}

	let (Ok(z), Ok(x), Ok(y)) = (z.parse::<u32>(), x.parse::<u64>(), y.parse::<u64>()) else {
		return TileResponse::bad_request("tile coordinates must be non-negative integers");
	};

	let accept_encoding = headers.get(ACCEPT_ENCODING).and_then(|value| value.to_str().ok());
	service.handle_tile(z, x, y, accept_encoding).await
}
