//! Serving tiles and TileJSON over HTTP.

mod backend;
mod routes;
mod service;
mod tile_server;

pub use backend::{ArchiveBackend, ObjectStoreBackend, SourceBackend, TileBackend};
pub use routes::router;
pub use service::{TileResponse, TileService};
pub use tile_server::TileServer;
