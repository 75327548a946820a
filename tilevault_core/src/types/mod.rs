mod blob;
mod byte_range;
mod geo;
mod metadata;
mod tile_compression;
mod tile_coord;
mod tile_format;
mod tile_scheme;

pub use blob::*;
pub use byte_range::*;
pub use geo::*;
pub use metadata::*;
pub use tile_compression::*;
pub use tile_coord::*;
pub use tile_format::*;
pub use tile_scheme::*;
