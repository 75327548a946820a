use crate::{
	store::{DirectoryObjectStore, HttpObjectStore, ObjectStore},
	transfer::ExportParameters,
};
use anyhow::{Result, bail};
use serde::Deserialize;
use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};
use tilevault_core::TileScheme;

/// Options of an export. Unset values keep the [`ExportParameters`] defaults.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
	pub concurrency: Option<usize>,
	pub max_retries: Option<u32>,
	pub queue_size: Option<usize>,
	pub prefix: Option<String>,
	pub cache_control: Option<String>,
	pub base_delay_ms: Option<u64>,
	pub max_delay_ms: Option<u64>,
	pub upload_metadata: Option<bool>,
	pub tile_url: Option<String>,
	/// `xyz` or `tms` rows in the keys.
	pub scheme: Option<TileScheme>,
	pub destination: Option<DestinationConfig>,
}

/// Object store receiving the export. Exactly one of `directory` and `http` is set.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
	pub directory: Option<PathBuf>,
	pub http: Option<String>,
}

impl ExportConfig {
	pub fn override_optional_concurrency(&mut self, concurrency: &Option<usize>) {
		if concurrency.is_some() {
			self.concurrency = *concurrency;
		}
	}

	pub fn resolve_paths(&mut self, base: &Path) {
		if let Some(DestinationConfig {
			directory: Some(path), ..
		}) = &mut self.destination
		{
			if path.is_relative() {
				*path = base.join(&*path);
			}
		}
	}

	pub fn parameters(&self) -> ExportParameters {
		let mut parameters = ExportParameters::default();
		if let Some(concurrency) = self.concurrency {
			parameters.concurrency = concurrency;
		}
		if let Some(max_retries) = self.max_retries {
			parameters.max_retries = max_retries;
		}
		if let Some(queue_size) = self.queue_size {
			parameters.queue_size = queue_size;
		}
		if let Some(prefix) = &self.prefix {
			parameters.prefix.clone_from(prefix);
		}
		if let Some(cache_control) = &self.cache_control {
			parameters.cache_control.clone_from(cache_control);
		}
		if let Some(ms) = self.base_delay_ms {
			parameters.base_delay = Duration::from_millis(ms);
		}
		if let Some(ms) = self.max_delay_ms {
			parameters.max_delay = Duration::from_millis(ms);
		}
		if let Some(upload_metadata) = self.upload_metadata {
			parameters.upload_metadata = upload_metadata;
		}
		if self.tile_url.is_some() {
			parameters.tile_url.clone_from(&self.tile_url);
		}
		if let Some(scheme) = self.scheme {
			parameters.scheme = scheme;
		}
		parameters
	}

	pub fn open_destination(&self) -> Result<Arc<dyn ObjectStore>> {
		let Some(destination) = &self.destination else {
			bail!("export needs a 'destination'");
		};
		Ok(match (&destination.directory, &destination.http) {
			(Some(path), None) => Arc::new(DirectoryObjectStore::new(path)?),
			(None, Some(url)) => Arc::new(HttpObjectStore::new(url)?),
			_ => bail!("export destination needs exactly one of 'directory' and 'http'"),
		})
	}
}
