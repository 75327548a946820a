//! The indexed archive: one file holding a header, the tile blobs, JSON metadata and a two-level
//! directory that maps tile ids to byte ranges.

mod directory;
mod header;
mod reader;
mod writer;

pub use directory::{DirectoryEntry, deserialize_entries, find_entry, serialize_entries};
pub use header::{ArchiveHeader, HEADER_LENGTH, HEADER_MAGIC, HEADER_VERSION};
pub use reader::ArchiveReader;
pub use writer::{ArchiveParameters, ArchiveSummary, ArchiveWriter, build_archive};
