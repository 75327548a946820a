use super::{ObjectStore, StoreObject, check_key};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
	collections::BTreeMap,
	sync::atomic::{AtomicU64, Ordering},
};
use tilevault_core::Blob;

/// Objects held in process memory. Used for staging and in tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
	objects: RwLock<BTreeMap<String, StoreObject>>,
	puts: AtomicU64,
}

impl MemoryObjectStore {
	pub fn new() -> MemoryObjectStore {
		MemoryObjectStore::default()
	}

	pub fn len(&self) -> usize {
		self.objects.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.read().is_empty()
	}

	/// All keys in lexicographic order.
	pub fn keys(&self) -> Vec<String> {
		self.objects.read().keys().cloned().collect()
	}

	pub fn object(&self, key: &str) -> Option<StoreObject> {
		self.objects.read().get(key).cloned()
	}

	/// Number of successful `put` calls, overwrites included.
	pub fn put_count(&self) -> u64 {
		self.puts.load(Ordering::Relaxed)
	}

	/// Copy of the whole content, for comparing store states.
	pub fn snapshot(&self) -> BTreeMap<String, StoreObject> {
		self.objects.read().clone()
	}
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
	fn store_name(&self) -> &str {
		"memory"
	}

	async fn put(&self, key: &str, object: StoreObject) -> Result<()> {
		check_key(key)?;
		log::trace!("put '{key}' ({} bytes)", object.data.len());
		self.objects.write().insert(key.to_string(), object);
		self.puts.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Blob>> {
		Ok(self.objects.read().get(key).map(|object| object.data.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn put_overwrites() -> Result<()> {
		let store = MemoryObjectStore::new();
		let object = |text: &str| StoreObject {
			data: Blob::from(text),
			content_type: "text/plain".to_string(),
			..Default::default()
		};
		store.put("a/b", object("first")).await?;
		store.put("a/b", object("second")).await?;
		store.put("a/c", object("third")).await?;

		assert_eq!(store.len(), 2);
		assert_eq!(store.put_count(), 3);
		assert_eq!(store.keys(), vec!["a/b", "a/c"]);
		assert_eq!(store.get("a/b").await?.unwrap().as_str(), "second");
		assert_eq!(store.get("a/d").await?, None);
		Ok(())
	}

	#[tokio::test]
	async fn invalid_keys_are_rejected() {
		let store = MemoryObjectStore::new();
		assert!(store.put("../x", StoreObject::default()).await.is_err());
		assert!(store.is_empty());
	}
}
