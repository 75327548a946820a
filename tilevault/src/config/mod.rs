//! YAML configuration of the server and of exports.
//!
//! - [`Config`]: top-level loader
//! - [`ServerConfig`]: listener, public URL and response headers
//! - [`SourceConfig`]: the tileset that is served or exported
//! - [`ExportConfig`]: export options and destination

mod export;
mod main;
mod server;
mod source;

pub use export::{DestinationConfig, ExportConfig};
pub use main::Config;
pub use server::ServerConfig;
pub use source::SourceConfig;
