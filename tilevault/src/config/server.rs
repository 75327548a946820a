use crate::server::{TileBackend, TileService};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
	/// IP to bind to. Defaults to `0.0.0.0`.
	pub ip: Option<String>,

	/// TCP port to bind to. Defaults to 8080.
	pub port: Option<u16>,

	/// Base URL announced in the TileJSON. Defaults to `http://localhost:{port}`.
	pub public_url: Option<String>,

	pub tile_cache_control: Option<String>,

	pub metadata_cache_control: Option<String>,

	/// How often an archive source is checked for a replaced file, in seconds. Defaults to 5.
	pub reload_interval_secs: Option<u64>,
}

impl ServerConfig {
	pub fn override_optional_ip(&mut self, ip: &Option<String>) {
		if ip.is_some() {
			self.ip = ip.clone();
		}
	}

	pub fn override_optional_port(&mut self, port: &Option<u16>) {
		if port.is_some() {
			self.port = *port;
		}
	}

	pub fn override_optional_public_url(&mut self, public_url: &Option<String>) {
		if public_url.is_some() {
			self.public_url = public_url.clone();
		}
	}

	pub fn ip(&self) -> &str {
		self.ip.as_deref().unwrap_or("0.0.0.0")
	}

	pub fn port(&self) -> u16 {
		self.port.unwrap_or(8080)
	}

	pub fn reload_interval(&self) -> Duration {
		Duration::from_secs(self.reload_interval_secs.unwrap_or(5))
	}

	pub fn public_url(&self) -> String {
		match &self.public_url {
			Some(url) => url.clone(),
			None => format!("http://localhost:{}", self.port()),
		}
	}

	pub fn build_service(&self, backend: Arc<dyn TileBackend>) -> TileService {
		let mut service = TileService::new(backend).with_public_url(&self.public_url());
		if self.tile_cache_control.is_some() || self.metadata_cache_control.is_some() {
			service = service.with_cache_control(
				self.tile_cache_control.as_deref().unwrap_or("public, max-age=2592000"),
				self.metadata_cache_control.as_deref().unwrap_or("public, max-age=86400"),
			);
		}
		service
	}
}
