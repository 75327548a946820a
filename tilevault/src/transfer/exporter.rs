//! Parallel upload of a whole tileset to an [`ObjectStore`].
//!
//! One blocking task drains the source iterator into a bounded queue. `concurrency` worker tasks pull
//! tiles from the queue, derive the key and upload with retries. Counters and failed keys live in a single
//! mutex-protected [`ExportState`]; an optional observer gets snapshots of it while the export runs.

use super::{CancelToken, ExportObserver, ExportParameters, ExportProgress, ExportSummary};
use crate::store::{ObjectStore, StoreObject, metadata_key, tile_key, tile_url_template};
use anyhow::{Context, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use std::{
	sync::Arc,
	time::{Duration, Instant},
};
use tilevault_container::{Tile, TileSource};
use tilevault_core::{Blob, TileCompression, TileError, TileFormat, TileSetMetadata};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

#[derive(Debug, Default)]
struct ExportState {
	queued: u64,
	succeeded: u64,
	retries: u64,
	permanent: Vec<String>,
	exhausted: Vec<String>,
}

impl ExportState {
	fn progress(&self, elapsed: Duration, finished: bool) -> ExportProgress {
		ExportProgress {
			queued: self.queued,
			succeeded: self.succeeded,
			failed: (self.permanent.len() + self.exhausted.len()) as u64,
			retries: self.retries,
			elapsed,
			finished,
		}
	}
}

enum Outcome {
	Stored,
	Permanent,
	Exhausted,
}

pub struct TileExporter {
	source: Arc<dyn TileSource>,
	destination: Arc<dyn ObjectStore>,
	parameters: ExportParameters,
	observer: Option<Arc<dyn ExportObserver>>,
	cancel: CancelToken,
}

impl TileExporter {
	pub fn new(source: Arc<dyn TileSource>, destination: Arc<dyn ObjectStore>, parameters: ExportParameters) -> Self {
		TileExporter {
			source,
			destination,
			parameters,
			observer: None,
			cancel: CancelToken::default(),
		}
	}

	pub fn with_observer(mut self, observer: Arc<dyn ExportObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	/// Uses `token` instead of a fresh one, so one token can stop several exports.
	pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
		self.cancel = token;
		self
	}

	/// Token that stops this export from enqueueing more tiles. Queued and in-flight uploads still finish.
	pub fn cancel_token(&self) -> CancelToken {
		self.cancel.clone()
	}

	pub async fn run(&self) -> Result<ExportSummary> {
		let parameters = &self.parameters;
		let metadata = self.source.metadata().clone();
		log::info!(
			"export '{}' to '{}' with {} workers",
			self.source.source_name(),
			self.destination.store_name(),
			parameters.concurrency
		);

		let started = Instant::now();
		let state = Arc::new(Mutex::new(ExportState::default()));
		let uploader = Arc::new(Uploader {
			destination: self.destination.clone(),
			parameters: parameters.clone(),
			format: metadata.format,
			state: state.clone(),
		});

		let (sender, receiver) = mpsc::channel::<Tile>(parameters.queue_size.max(1));
		let producer = {
			let source = self.source.clone();
			let cancel = self.cancel.clone();
			let state = state.clone();
			tokio::task::spawn_blocking(move || produce(source.as_ref(), &sender, &cancel, &state))
		};

		let receiver = Arc::new(AsyncMutex::new(receiver));
		let workers = (0..parameters.concurrency.max(1))
			.map(|_| {
				let receiver = receiver.clone();
				let uploader = uploader.clone();
				tokio::spawn(async move { uploader.drain(&receiver).await })
			})
			.collect::<Vec<_>>();
		// the channel closes once every worker is gone, which unblocks the producer
		drop(receiver);

		let reporter = self.observer.clone().map(|observer| {
			let state = state.clone();
			let interval = parameters.progress_interval.max(Duration::from_millis(10));
			tokio::spawn(async move {
				loop {
					tokio::time::sleep(interval).await;
					let progress = state.lock().progress(started.elapsed(), false);
					observer.progress(&progress);
				}
			})
		});

		let finished = join_all(workers).await;
		let produced = producer.await;
		if let Some(reporter) = reporter {
			reporter.abort();
		}
		for worker in finished {
			worker.context("upload worker panicked")?;
		}
		let produced = produced.context("tile reader panicked")?;

		let cancelled = self.cancel.is_cancelled();
		let mut metadata_uploaded = false;
		if produced.is_ok() && parameters.upload_metadata && !cancelled {
			metadata_uploaded = uploader.upload_metadata(metadata).await?;
		}

		let summary = {
			let mut state = state.lock();
			state.permanent.sort();
			state.exhausted.sort();
			if let Some(observer) = &self.observer {
				observer.progress(&state.progress(started.elapsed(), true));
			}
			ExportSummary {
				succeeded: state.succeeded,
				permanent_failures: state.permanent.clone(),
				exhausted_failures: state.exhausted.clone(),
				retries: state.retries,
				cancelled,
				metadata_uploaded,
			}
		};

		produced.with_context(|| format!("reading tiles from '{}'", self.source.source_name()))?;
		log::info!(
			"export finished in {:.1?}: {} uploaded, {} failed, {} retries{}",
			started.elapsed(),
			summary.succeeded,
			summary.failed().len(),
			summary.retries,
			if cancelled { ", cancelled" } else { "" }
		);
		Ok(summary)
	}
}

/// Uploads every tile of `source` to `destination` with default parameters otherwise.
pub async fn export(
	source: Arc<dyn TileSource>,
	destination: Arc<dyn ObjectStore>,
	concurrency: usize,
	max_retries: u32,
) -> Result<ExportSummary> {
	let parameters = ExportParameters {
		concurrency,
		max_retries,
		..Default::default()
	};
	TileExporter::new(source, destination, parameters).run().await
}

fn produce(
	source: &dyn TileSource,
	sender: &mpsc::Sender<Tile>,
	cancel: &CancelToken,
	state: &Mutex<ExportState>,
) -> Result<()> {
	for tile in source.iter_tiles()? {
		if cancel.is_cancelled() {
			log::info!("export cancelled, no more tiles are queued");
			break;
		}
		let tile = tile?;
		state.lock().queued += 1;
		if sender.blocking_send(tile).is_err() {
			log::debug!("upload queue closed");
			break;
		}
	}
	Ok(())
}

struct Uploader {
	destination: Arc<dyn ObjectStore>,
	parameters: ExportParameters,
	format: TileFormat,
	state: Arc<Mutex<ExportState>>,
}

impl Uploader {
	async fn drain(&self, receiver: &AsyncMutex<mpsc::Receiver<Tile>>) {
		loop {
			let next = receiver.lock().await.recv().await;
			let Some(tile) = next else {
				break;
			};

			let coord = tile.coord.to_scheme(tile.scheme, self.parameters.scheme);
			let key = tile_key(&self.parameters.prefix, &coord, self.format);
			let object = self.object(tile.data, tile.compression, self.format.content_type());

			let outcome = self.upload(&key, object).await;
			let mut state = self.state.lock();
			match outcome {
				Outcome::Stored => state.succeeded += 1,
				Outcome::Permanent => state.permanent.push(key),
				Outcome::Exhausted => state.exhausted.push(key),
			}
		}
	}

	fn object(&self, data: Blob, compression: TileCompression, content_type: &str) -> StoreObject {
		StoreObject {
			data,
			content_type: content_type.to_string(),
			content_encoding: compression.content_encoding().map(str::to_string),
			cache_control: Some(self.parameters.cache_control.clone()),
		}
	}

	async fn upload(&self, key: &str, object: StoreObject) -> Outcome {
		let mut attempt = 0;
		loop {
			match self.destination.put(key, object.clone()).await {
				Ok(()) => return Outcome::Stored,
				Err(error) if TileError::is_transient(&error) => {
					if attempt >= self.parameters.max_retries {
						log::warn!("giving up on '{key}' after {} attempts: {error:#}", attempt + 1);
						return Outcome::Exhausted;
					}
					let delay = self.parameters.backoff(attempt);
					log::debug!("retry '{key}' in {delay:?}: {error:#}");
					self.state.lock().retries += 1;
					attempt += 1;
					tokio::time::sleep(delay).await;
				}
				Err(error) => {
					log::warn!("failed to upload '{key}': {error:#}");
					return Outcome::Permanent;
				}
			}
		}
	}

	/// Uploads the TileJSON describing the exported keys. Returns whether it was stored.
	async fn upload_metadata(&self, mut metadata: TileSetMetadata) -> Result<bool> {
		metadata.scheme = self.parameters.scheme;
		let tile_url = match &self.parameters.tile_url {
			Some(url) => url.clone(),
			None => tile_url_template(&self.parameters.prefix, self.format),
		};
		let json = serde_json::to_string(&metadata.to_tilejson(&tile_url)?)?;
		let key = metadata_key(&self.parameters.prefix);
		let object = self.object(Blob::from(json), TileCompression::Uncompressed, "application/json");

		let outcome = self.upload(&key, object).await;
		let mut state = self.state.lock();
		Ok(match outcome {
			Outcome::Stored => true,
			Outcome::Permanent => {
				state.permanent.push(key);
				false
			}
			Outcome::Exhausted => {
				state.exhausted.push(key);
				false
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::MemoryObjectStore;
	use async_trait::async_trait;
	use pretty_assertions::assert_eq;
	use std::{
		collections::HashSet,
		sync::atomic::{AtomicU64, Ordering},
	};
	use tilevault_container::{TileSet, testing};
	use tilevault_core::TileScheme;

	fn fast(concurrency: usize, max_retries: u32) -> ExportParameters {
		ExportParameters {
			concurrency,
			max_retries,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
			..Default::default()
		}
	}

	/// Fails the first attempt of every 50th key with a transient error.
	#[derive(Debug, Default)]
	struct FlakyStore {
		inner: MemoryObjectStore,
		calls: AtomicU64,
		failed_once: parking_lot::Mutex<HashSet<String>>,
	}

	#[async_trait]
	impl ObjectStore for FlakyStore {
		fn store_name(&self) -> &str {
			"flaky"
		}

		async fn put(&self, key: &str, object: StoreObject) -> Result<()> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			if call % 50 == 0 && self.failed_once.lock().insert(key.to_string()) {
				anyhow::bail!(TileError::transient(format!("throttled '{key}'")));
			}
			self.inner.put(key, object).await
		}

		async fn get(&self, key: &str) -> Result<Option<Blob>> {
			self.inner.get(key).await
		}
	}

	/// Rejects keys containing `reject` permanently and keys containing `stall` transiently, forever.
	#[derive(Debug)]
	struct PickyStore {
		inner: MemoryObjectStore,
		reject: &'static str,
		stall: &'static str,
	}

	#[async_trait]
	impl ObjectStore for PickyStore {
		fn store_name(&self) -> &str {
			"picky"
		}

		async fn put(&self, key: &str, object: StoreObject) -> Result<()> {
			if key.contains(self.reject) {
				anyhow::bail!(TileError::permanent("forbidden"));
			}
			if key.contains(self.stall) {
				anyhow::bail!(TileError::transient("slow down"));
			}
			self.inner.put(key, object).await
		}

		async fn get(&self, key: &str) -> Result<Option<Blob>> {
			self.inner.get(key).await
		}
	}

	/// Cancels the export after a number of uploads.
	#[derive(Debug)]
	struct CancellingStore {
		inner: MemoryObjectStore,
		token: CancelToken,
		after: u64,
	}

	#[async_trait]
	impl ObjectStore for CancellingStore {
		fn store_name(&self) -> &str {
			"cancelling"
		}

		async fn put(&self, key: &str, object: StoreObject) -> Result<()> {
			self.inner.put(key, object).await?;
			if self.inner.put_count() >= self.after {
				self.token.cancel();
			}
			Ok(())
		}

		async fn get(&self, key: &str) -> Result<Option<Blob>> {
			self.inner.get(key).await
		}
	}

	/// Panics on every upload.
	#[derive(Debug)]
	struct PanickingStore;

	#[async_trait]
	impl ObjectStore for PanickingStore {
		fn store_name(&self) -> &str {
			"panicking"
		}

		async fn put(&self, key: &str, _object: StoreObject) -> Result<()> {
			panic!("cannot store '{key}'");
		}

		async fn get(&self, _key: &str) -> Result<Option<Blob>> {
			Ok(None)
		}
	}

	#[derive(Default)]
	struct Recorder(parking_lot::Mutex<Vec<ExportProgress>>);

	impl ExportObserver for Recorder {
		fn progress(&self, progress: &ExportProgress) {
			self.0.lock().push(progress.clone());
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn uploads_every_tile_with_headers() -> Result<()> {
		let store = Arc::new(MemoryObjectStore::new());
		let summary = export(Arc::new(testing::tile_set(0, 3)), store.clone(), 4, 3).await?;

		assert_eq!(summary.succeeded, 85);
		assert!(summary.is_complete());
		assert!(summary.metadata_uploaded);
		assert_eq!(store.len(), 86);

		let object = store.object("tiles/3/5/2.pbf").unwrap();
		assert_eq!(object.data.as_str(), "tile 3/5/2");
		assert_eq!(object.content_type, "application/x-protobuf");
		assert_eq!(object.content_encoding, None);
		assert_eq!(object.cache_control.as_deref(), Some("public, max-age=31536000"));

		let tilejson: serde_json::Value = serde_json::from_str(&store.object("tiles/metadata.json").unwrap().data.as_str())?;
		assert_eq!(tilejson["tiles"][0], "tiles/{z}/{x}/{y}.pbf");
		assert_eq!(tilejson["scheme"], "xyz");
		assert_eq!(tilejson["maxzoom"], 3);
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn reexport_leaves_the_destination_unchanged() -> Result<()> {
		let store = Arc::new(MemoryObjectStore::new());
		let source = Arc::new(testing::tile_set(0, 2));
		export(source.clone(), store.clone(), 3, 0).await?;
		let first = store.snapshot();
		export(source, store.clone(), 5, 0).await?;
		assert_eq!(store.snapshot(), first);
		assert_eq!(store.put_count(), 2 * 22);
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
	async fn transient_failures_are_retried() -> Result<()> {
		let tiles = testing::pyramid(0, 7).into_iter().take(10_000).collect::<Vec<_>>();
		let source = Arc::new(TileSet::new("ten thousand", testing::metadata(0, 7), tiles));
		let store = Arc::new(FlakyStore::default());

		let summary = TileExporter::new(source, store.clone(), fast(8, 3)).run().await?;

		assert_eq!(summary.succeeded, 10_000);
		assert_eq!(summary.failed(), Vec::<String>::new());
		assert!(summary.retries >= 150);
		assert_eq!(summary.retries, store.failed_once.lock().len() as u64);
		assert_eq!(store.inner.len(), 10_001);
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn permanent_and_exhausted_failures() -> Result<()> {
		let store = Arc::new(PickyStore {
			inner: MemoryObjectStore::new(),
			reject: "tiles/2/",
			stall: "tiles/1/1/",
		});
		let summary = TileExporter::new(Arc::new(testing::tile_set(0, 2)), store.clone(), fast(4, 2))
			.run()
			.await?;

		assert_eq!(summary.succeeded, 21 - 16 - 2);
		assert_eq!(summary.permanent_failures.len(), 16);
		assert_eq!(summary.permanent_failures[0], "tiles/2/0/0.pbf");
		assert_eq!(summary.exhausted_failures, vec!["tiles/1/1/0.pbf", "tiles/1/1/1.pbf"]);
		assert_eq!(summary.retries, 2 * 2);
		assert_eq!(summary.failed().len(), 18);
		assert!(!summary.is_complete());
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn cancel_before_start() -> Result<()> {
		let store = Arc::new(MemoryObjectStore::new());
		let exporter = TileExporter::new(Arc::new(testing::tile_set(0, 3)), store.clone(), fast(2, 0));
		exporter.cancel_token().cancel();
		let summary = exporter.run().await?;
		assert!(summary.cancelled);
		assert_eq!(summary.succeeded, 0);
		assert!(!summary.metadata_uploaded);
		assert!(store.is_empty());
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn cancel_while_running() -> Result<()> {
		let token = CancelToken::default();
		let store = Arc::new(CancellingStore {
			inner: MemoryObjectStore::new(),
			token: token.clone(),
			after: 10,
		});
		let recorder = Arc::new(Recorder::default());
		let parameters = ExportParameters {
			queue_size: 4,
			..fast(2, 0)
		};
		let summary = TileExporter::new(Arc::new(testing::tile_set(0, 5)), store.clone(), parameters)
			.with_observer(recorder.clone())
			.with_cancel_token(token)
			.run()
			.await?;

		assert!(summary.cancelled);
		assert!(!summary.metadata_uploaded);
		assert!(summary.succeeded >= 10);
		assert!(summary.succeeded < 1365);
		assert_eq!(summary.succeeded, store.inner.len() as u64);

		let last = recorder.0.lock().last().cloned().unwrap();
		assert!(last.finished);
		assert_eq!(last.succeeded, summary.succeeded);
		assert_eq!(last.queued, summary.succeeded);
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn worker_panic_stops_progress_reports() {
		let recorder = Arc::new(Recorder::default());
		let parameters = ExportParameters {
			progress_interval: Duration::from_millis(10),
			queue_size: 1,
			..fast(2, 0)
		};
		let error = TileExporter::new(Arc::new(testing::tile_set(0, 3)), Arc::new(PanickingStore), parameters)
			.with_observer(recorder.clone())
			.run()
			.await
			.unwrap_err();
		assert!(format!("{error:#}").contains("upload worker panicked"));

		// the aborted reporter task releases its handle on the observer
		for _ in 0..100 {
			if Arc::strong_count(&recorder) == 1 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(Arc::strong_count(&recorder), 1);
		let reports = recorder.0.lock().len();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(recorder.0.lock().len(), reports);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn tms_keys_and_custom_url() -> Result<()> {
		let store = Arc::new(MemoryObjectStore::new());
		let parameters = ExportParameters {
			scheme: TileScheme::Tms,
			prefix: "v1".to_string(),
			tile_url: Some("https://cdn.example.org/v1/{z}/{x}/{y}.pbf".to_string()),
			..fast(2, 0)
		};
		TileExporter::new(Arc::new(testing::tile_set(1, 1)), store.clone(), parameters)
			.run()
			.await?;

		assert_eq!(store.object("v1/1/0/1.pbf").unwrap().data.as_str(), "tile 1/0/0");
		let tilejson: serde_json::Value = serde_json::from_str(&store.object("v1/metadata.json").unwrap().data.as_str())?;
		assert_eq!(tilejson["tiles"][0], "https://cdn.example.org/v1/{z}/{x}/{y}.pbf");
		assert_eq!(tilejson["scheme"], "tms");
		Ok(())
	}
}
