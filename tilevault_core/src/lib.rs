//! Value types shared by every TileVault crate: coordinates, row schemes, blobs, tileset metadata,
//! the error taxonomy and the binary value reader/writer used by the archive format.

pub mod compression;
pub mod concurrency;
pub mod error;
pub mod io;
pub mod types;

pub use concurrency::ConcurrencyLimits;
pub use error::TileError;
pub use types::*;
