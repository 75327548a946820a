//! TileVault Container: read, write and combine tile stores.
//!
//! Every readable store implements [`TileSource`]: MBTiles databases ([`MBTilesReader`]), indexed archives
//! ([`ArchiveReader`]), in-memory sets ([`TileSet`]) and merged pyramids ([`MergedTileSet`]). Sources are
//! synchronous and safe to share between threads; async callers move them onto blocking threads.
//!
//! ```no_run
//! use std::path::Path;
//! use tilevault_container::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let reader = MBTilesReader::open(Path::new("planet.mbtiles"))?;
//!     let summary = ArchiveWriter::write_source(Path::new("planet.tvarchive"), &reader, ArchiveParameters::default())?;
//!     println!("{} tiles in {} entries", summary.addressed_tiles, summary.tile_entries);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//! - `test`: fixtures for tests in downstream crates.

mod archive;
pub use archive::*;

mod mbtiles;
pub use mbtiles::*;

mod merge;
pub use merge::*;

mod source;
pub use source::*;

mod tile;
pub use tile::*;

#[cfg(any(test, feature = "test"))]
pub mod testing;
