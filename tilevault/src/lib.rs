//! TileVault: export tilesets to object stores and serve them over HTTP.
//!
//! - [`store`]: object stores tiles are uploaded to (directory, HTTP bucket, memory)
//! - [`transfer`]: the parallel exporter with retries, progress and cancellation
//! - [`server`]: tile and TileJSON endpoints on top of archives, MBTiles or exported objects
//! - [`config`]: YAML configuration tying these together
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilevault::{store::DirectoryObjectStore, transfer::export};
//! use tilevault_container::ArchiveReader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(ArchiveReader::open("plss.tvarchive".as_ref())?);
//!     let destination = Arc::new(DirectoryObjectStore::new("public".as_ref())?);
//!     let summary = export(source, destination, 50, 3).await?;
//!     println!("{} tiles uploaded, {} failed", summary.succeeded, summary.failed().len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod server;
pub mod store;
pub mod transfer;
