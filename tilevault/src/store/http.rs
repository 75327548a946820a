use super::{ObjectStore, StoreObject, check_key};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{
	Client, StatusCode, Url,
	header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE},
};
use std::time::Duration;
use tilevault_core::{Blob, TileError};

/// Objects behind an HTTP endpoint that accepts `PUT` and answers `GET` per key, such as an S3-compatible
/// bucket or a MinIO server. The key is appended to the base URL.
#[derive(Debug)]
pub struct HttpObjectStore {
	client: Client,
	name: String,
	base: Url,
}

impl HttpObjectStore {
	pub fn new(base_url: &str) -> Result<HttpObjectStore> {
		Self::with_timeout(base_url, Duration::from_secs(60))
	}

	pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<HttpObjectStore> {
		let mut base = Url::parse(base_url).with_context(|| format!("parsing URL '{base_url}'"))?;
		match base.scheme() {
			"http" | "https" => (),
			other => bail!("unsupported URL scheme '{other}' in '{base_url}', expected 'http' or 'https'"),
		}
		if !base.path().ends_with('/') {
			base.set_path(&format!("{}/", base.path()));
		}

		let client = Client::builder()
			.tcp_keepalive(Duration::from_secs(600))
			.timeout(timeout)
			.build()?;

		Ok(HttpObjectStore {
			client,
			name: base.to_string(),
			base,
		})
	}

	fn url(&self, key: &str) -> Result<Url> {
		check_key(key)?;
		self
			.base
			.join(key)
			.map_err(|e| TileError::permanent(format!("invalid object key '{key}': {e}")).into())
	}
}

/// Connection problems, timeouts and interrupted bodies are worth another attempt.
fn request_error(error: reqwest::Error, what: &str) -> anyhow::Error {
	if error.is_connect() || error.is_timeout() || error.is_body() || error.is_request() {
		TileError::transient(format!("{what}: {error}")).into()
	} else {
		TileError::permanent(format!("{what}: {error}")).into()
	}
}

/// Maps an unsuccessful status: 408, 429 and 5xx are transient, the rest permanent.
fn status_error(status: StatusCode, what: &str) -> anyhow::Error {
	if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
		TileError::transient(format!("{what}: HTTP {status}")).into()
	} else {
		TileError::permanent(format!("{what}: HTTP {status}")).into()
	}
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
	fn store_name(&self) -> &str {
		&self.name
	}

	async fn put(&self, key: &str, object: StoreObject) -> Result<()> {
		let url = self.url(key)?;
		let what = format!("PUT {url}");
		log::trace!("{what}");

		let mut request = self
			.client
			.put(url)
			.header(CONTENT_TYPE, object.content_type)
			.body(object.data.into_vec());
		if let Some(encoding) = object.content_encoding {
			request = request.header(CONTENT_ENCODING, encoding);
		}
		if let Some(cache_control) = object.cache_control {
			request = request.header(CACHE_CONTROL, cache_control);
		}

		let response = request.send().await.map_err(|e| request_error(e, &what))?;
		if !response.status().is_success() {
			return Err(status_error(response.status(), &what));
		}
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Blob>> {
		let url = self.url(key)?;
		let what = format!("GET {url}");
		log::trace!("{what}");

		let response = self.client.get(url).send().await.map_err(|e| request_error(e, &what))?;
		match response.status() {
			StatusCode::NOT_FOUND => Ok(None),
			status if status.is_success() => {
				let bytes = response.bytes().await.map_err(|e| request_error(e, &what))?;
				Ok(Some(Blob::from(bytes.to_vec())))
			}
			status => Err(status_error(status, &what)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{
		Router,
		body::Bytes,
		extract::{Path, State},
		http::{HeaderMap, StatusCode as AxumStatus},
		routing::put,
	};
	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;
	use rstest::rstest;
	use std::{collections::HashMap, sync::Arc};

	type Bucket = Arc<Mutex<HashMap<String, (Bytes, Option<String>)>>>;

	/// Minimal bucket: stores PUT bodies, answers 503 for keys starting with `busy`, 403 for `denied`.
	async fn serve_bucket() -> (String, Bucket) {
		async fn store(Path(key): Path<String>, State(bucket): State<Bucket>, headers: HeaderMap, body: Bytes) -> AxumStatus {
			if key.starts_with("busy") {
				return AxumStatus::SERVICE_UNAVAILABLE;
			}
			if key.starts_with("denied") {
				return AxumStatus::FORBIDDEN;
			}
			let encoding = headers
				.get("content-encoding")
				.and_then(|v| v.to_str().ok())
				.map(str::to_string);
			bucket.lock().insert(key, (body, encoding));
			AxumStatus::OK
		}

		async fn load(Path(key): Path<String>, State(bucket): State<Bucket>) -> Result<Bytes, AxumStatus> {
			bucket.lock().get(&key).map(|(body, _)| body.clone()).ok_or(AxumStatus::NOT_FOUND)
		}

		let bucket = Bucket::default();
		let app = Router::new()
			.route("/bucket/{*key}", put(store).get(load))
			.with_state(bucket.clone());
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, app).await.ok() });
		(format!("http://{address}/bucket"), bucket)
	}

	fn object(text: &str) -> StoreObject {
		StoreObject {
			data: Blob::from(text),
			content_type: "application/x-protobuf".to_string(),
			content_encoding: Some("gzip".to_string()),
			cache_control: Some("public, max-age=60".to_string()),
		}
	}

	#[tokio::test]
	async fn put_and_get() -> Result<()> {
		let (url, bucket) = serve_bucket().await;
		let store = HttpObjectStore::new(&url)?;

		store.put("tiles/1/0/1.pbf", object("payload")).await?;
		assert_eq!(
			bucket.lock().get("tiles/1/0/1.pbf").map(|(b, e)| (b.to_vec(), e.clone())),
			Some((b"payload".to_vec(), Some("gzip".to_string())))
		);
		assert_eq!(store.get("tiles/1/0/1.pbf").await?.unwrap().as_str(), "payload");
		assert_eq!(store.get("tiles/1/0/0.pbf").await?, None);
		Ok(())
	}

	#[tokio::test]
	async fn failures_are_classified() -> Result<()> {
		let (url, _bucket) = serve_bucket().await;
		let store = HttpObjectStore::new(&url)?;

		let error = store.put("busy/0.pbf", object("x")).await.unwrap_err();
		assert!(TileError::is_transient(&error));

		let error = store.put("denied/0.pbf", object("x")).await.unwrap_err();
		assert!(matches!(TileError::find(&error), Some(TileError::PermanentIO(_))));
		Ok(())
	}

	#[tokio::test]
	async fn unreachable_host_is_transient() -> Result<()> {
		let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
		let address = listener.local_addr()?;
		drop(listener);

		let store = HttpObjectStore::with_timeout(&format!("http://{address}/"), Duration::from_secs(2))?;
		let error = store.put("tiles/0/0/0.pbf", object("x")).await.unwrap_err();
		assert!(TileError::is_transient(&error));
		Ok(())
	}

	#[rstest]
	#[case(408, true)]
	#[case(429, true)]
	#[case(500, true)]
	#[case(503, true)]
	#[case(400, false)]
	#[case(403, false)]
	#[case(404, false)]
	fn status_classes(#[case] code: u16, #[case] transient: bool) {
		let error = status_error(StatusCode::from_u16(code).unwrap(), "PUT x");
		assert_eq!(TileError::is_transient(&error), transient);
	}

	#[test]
	fn rejects_other_schemes() {
		assert!(HttpObjectStore::new("ftp://example.org/bucket").is_err());
		assert_eq!(
			HttpObjectStore::new("https://example.org/bucket").unwrap().store_name(),
			"https://example.org/bucket/"
		);
	}
}
