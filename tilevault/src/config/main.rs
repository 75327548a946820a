use super::{ExportConfig, ServerConfig, SourceConfig};
use crate::{server::TileServer, transfer::TileExporter};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
	fs::File,
	io::{BufReader, Read},
	path::Path,
};

#[derive(Default, Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
	/// HTTP server configuration
	#[serde(default)]
	pub server: ServerConfig,

	/// Tileset that is served or exported
	#[serde(default)]
	pub source: Option<SourceConfig>,

	/// Export options and destination
	#[serde(default)]
	pub export: ExportConfig,
}

impl Config {
	pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
		Ok(serde_yaml_ng::from_reader(reader)?)
	}

	pub fn from_string(text: &str) -> Result<Self> {
		Ok(serde_yaml_ng::from_str(text)?)
	}

	/// Parses the file at `path`. Relative file paths inside are resolved against the file's directory.
	pub fn from_path(path: &Path) -> Result<Self> {
		let file = File::open(path).with_context(|| format!("opening config {path:?}"))?;
		let mut config =
			Config::from_reader(BufReader::new(file)).with_context(|| format!("parsing config {path:?}"))?;
		let base = path.parent().unwrap_or(Path::new("."));
		config.resolve_paths(base);
		Ok(config)
	}

	pub fn resolve_paths(&mut self, base: &Path) {
		if let Some(source) = &mut self.source {
			source.resolve_paths(base);
		}
		self.export.resolve_paths(base);
	}

	fn source(&self) -> Result<&SourceConfig> {
		self.source.as_ref().context("config has no 'source'")
	}

	/// Opens the source and wraps it in a server that is ready to start.
	pub async fn build_server(&self) -> Result<TileServer> {
		let backend = self.source()?.open_backend(self.server.reload_interval()).await?;
		let service = self.server.build_service(backend);
		Ok(TileServer::new(self.server.ip(), self.server.port(), service))
	}

	/// Opens the source and the destination of an export.
	pub fn build_exporter(&self) -> Result<TileExporter> {
		let source = self.source()?.open_source()?;
		let destination = self.export.open_destination()?;
		Ok(TileExporter::new(source, destination, self.export.parameters()))
	}
}
