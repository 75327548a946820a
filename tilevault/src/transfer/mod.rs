//! Uploading a tileset tile by tile into an [`ObjectStore`](crate::store::ObjectStore).

mod exporter;
mod parameters;
mod progress;

pub use exporter::{TileExporter, export};
pub use parameters::ExportParameters;
pub use progress::{CancelToken, ExportObserver, ExportProgress, ExportSummary, LogObserver};
