use super::{ObjectStore, StoreObject, check_key};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::{
	io::{self, ErrorKind, Write},
	path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tilevault_core::{Blob, TileError};

/// Objects stored as files below a root directory; the key is the relative path.
///
/// Writes go to a temporary file in the target directory that is renamed over the key, so readers never
/// see a partial object. Headers are not persisted.
#[derive(Debug)]
pub struct DirectoryObjectStore {
	name: String,
	root: PathBuf,
}

impl DirectoryObjectStore {
	/// Uses `root`, creating it if needed.
	pub fn new(root: &Path) -> Result<DirectoryObjectStore> {
		std::fs::create_dir_all(root).with_context(|| format!("creating directory '{}'", root.display()))?;
		Ok(DirectoryObjectStore {
			name: root.display().to_string(),
			root: root.to_path_buf(),
		})
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path(&self, key: &str) -> Result<PathBuf> {
		check_key(key)?;
		Ok(self.root.join(key))
	}
}

/// Interrupted or timed out calls may succeed when repeated; everything else will not.
fn io_error(error: io::Error, what: String) -> anyhow::Error {
	match error.kind() {
		ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
			TileError::transient(format!("{what}: {error}")).into()
		}
		_ => TileError::permanent(format!("{what}: {error}")).into(),
	}
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
	let parent = path.parent().unwrap_or(Path::new("."));
	std::fs::create_dir_all(parent)?;
	let mut temp = NamedTempFile::new_in(parent)?;
	temp.write_all(data)?;
	temp.persist(path).map_err(|e| e.error)?;
	Ok(())
}

#[async_trait]
impl ObjectStore for DirectoryObjectStore {
	fn store_name(&self) -> &str {
		&self.name
	}

	async fn put(&self, key: &str, object: StoreObject) -> Result<()> {
		let path = self.path(key)?;
		log::trace!("write {path:?}");
		let target = path.clone();
		tokio::task::spawn_blocking(move || write_atomic(&target, object.data.as_slice()))
			.await
			.map_err(|e| anyhow!(TileError::transient(format!("writing {path:?}: {e}"))))?
			.map_err(|e| io_error(e, format!("writing {path:?}")))
	}

	async fn get(&self, key: &str) -> Result<Option<Blob>> {
		let path = self.path(key)?;
		match tokio::fs::read(&path).await {
			Ok(data) => Ok(Some(Blob::from(data))),
			Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
			Err(error) => Err(io_error(error, format!("reading {path:?}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn put_creates_directories() -> Result<()> {
		let dir = TempDir::new()?;
		let store = DirectoryObjectStore::new(&dir.path().join("bucket"))?;
		let object = StoreObject {
			data: Blob::from("tile"),
			content_type: "application/x-protobuf".to_string(),
			..Default::default()
		};
		store.put("tiles/3/2/1.pbf", object.clone()).await?;
		store.put("tiles/3/2/1.pbf", object).await?;

		let path = dir.path().join("bucket/tiles/3/2/1.pbf");
		assert_eq!(std::fs::read_to_string(&path)?, "tile");
		assert_eq!(std::fs::read_dir(path.parent().unwrap())?.count(), 1);
		assert_eq!(store.get("tiles/3/2/1.pbf").await?.unwrap().as_str(), "tile");
		assert_eq!(store.get("tiles/3/2/2.pbf").await?, None);
		Ok(())
	}

	#[tokio::test]
	async fn escaping_keys_are_permanent_failures() -> Result<()> {
		let dir = TempDir::new()?;
		let store = DirectoryObjectStore::new(dir.path())?;
		let error = store.put("../outside", StoreObject::default()).await.unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::PermanentIO(_))));
		Ok(())
	}

	#[tokio::test]
	async fn key_below_a_file_is_permanent() -> Result<()> {
		let dir = TempDir::new()?;
		let store = DirectoryObjectStore::new(dir.path())?;
		store.put("tiles", StoreObject::default()).await?;
		let error = store.put("tiles/0/0/0.pbf", StoreObject::default()).await.unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::PermanentIO(_))));
		Ok(())
	}
}
