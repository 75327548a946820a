mod reader;
mod writer;

pub use reader::MBTilesReader;
pub use writer::MBTilesWriter;
