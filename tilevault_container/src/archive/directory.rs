//! Directory pages: sorted [`DirectoryEntry`] lists, serialized column by column as varints.
//!
//! A serialized page is `count`, then `count` tile id deltas, run lengths, lengths and offsets. An offset
//! is written as `0` when the entry starts right where the previous one ends, otherwise as `offset + 1`.
//! The page is then compressed with the archive's internal compression.

use anyhow::{Result, bail};
use tilevault_core::{
	Blob, ByteRange, TileCompression, TileError,
	compression::{compress, decompress},
	io::{ValueReader, ValueReaderSlice, ValueWriter, ValueWriterBlob},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
	pub tile_id: u64,
	pub offset: u64,
	pub length: u32,
	/// Number of consecutive tile ids sharing this content. `0` marks a pointer to a leaf page.
	pub run_length: u32,
}

impl DirectoryEntry {
	pub fn new(tile_id: u64, offset: u64, length: u32, run_length: u32) -> DirectoryEntry {
		DirectoryEntry {
			tile_id,
			offset,
			length,
			run_length,
		}
	}

	pub fn is_leaf_pointer(&self) -> bool {
		self.run_length == 0
	}

	pub fn range(&self) -> ByteRange {
		ByteRange::new(self.offset, u64::from(self.length))
	}
}

/// Entry responsible for `tile_id`: the tile entry whose run covers it, or the leaf pointer whose page
/// may contain it.
pub fn find_entry(entries: &[DirectoryEntry], tile_id: u64) -> Option<&DirectoryEntry> {
	let index = entries.partition_point(|entry| entry.tile_id <= tile_id);
	let entry = entries.get(index.checked_sub(1)?)?;
	if entry.is_leaf_pointer() || tile_id - entry.tile_id < u64::from(entry.run_length) {
		Some(entry)
	} else {
		None
	}
}

pub fn serialize_entries(entries: &[DirectoryEntry], compression: TileCompression) -> Result<Blob> {
	let mut writer = ValueWriterBlob::new_le();
	writer.write_varint(entries.len() as u64)?;

	let mut last_id = 0;
	for entry in entries {
		writer.write_varint(entry.tile_id - last_id)?;
		last_id = entry.tile_id;
	}
	for entry in entries {
		writer.write_varint(u64::from(entry.run_length))?;
	}
	for entry in entries {
		writer.write_varint(u64::from(entry.length))?;
	}
	for (i, entry) in entries.iter().enumerate() {
		if i > 0 && entries[i - 1].range().checked_end() == Some(entry.offset) {
			writer.write_varint(0)?;
		} else {
			writer.write_varint(entry.offset + 1)?;
		}
	}

	compress(writer.into_blob(), compression)
}

/// Inverse of [`serialize_entries`]. Malformed pages fail with [`TileError::Corrupt`].
pub fn deserialize_entries(blob: Blob, compression: TileCompression) -> Result<Vec<DirectoryEntry>> {
	let data = decompress(blob, compression).map_err(|e| TileError::corrupt(format!("directory page: {e:#}")))?;
	decode(&data).map_err(|e| TileError::corrupt(format!("directory page: {e:#}")).into())
}

fn decode(data: &Blob) -> Result<Vec<DirectoryEntry>> {
	let mut reader = ValueReaderSlice::new_le(data.as_slice());

	let count = reader.read_varint()?;
	// every entry takes at least four bytes
	if count > reader.remaining() / 4 {
		bail!("{count} entries cannot fit into {} bytes", data.len());
	}
	let count = count as usize;

	let mut entries = Vec::with_capacity(count);
	let mut last_id = 0u64;
	for i in 0..count {
		let delta = reader.read_varint()?;
		if i > 0 && delta == 0 {
			bail!("tile ids are not strictly increasing at entry {i}");
		}
		last_id = last_id
			.checked_add(delta)
			.ok_or_else(|| anyhow::anyhow!("tile id overflow at entry {i}"))?;
		entries.push(DirectoryEntry::new(last_id, 0, 0, 0));
	}
	for entry in &mut entries {
		entry.run_length = u32::try_from(reader.read_varint()?)?;
	}
	for entry in &mut entries {
		entry.length = u32::try_from(reader.read_varint()?)?;
	}
	for i in 0..count {
		let value = reader.read_varint()?;
		entries[i].offset = match (i, value) {
			(0, 0) => bail!("first entry has no explicit offset"),
			(_, 0) => entries[i - 1]
				.range()
				.checked_end()
				.ok_or_else(|| anyhow::anyhow!("offset overflow at entry {i}"))?,
			(_, value) => value - 1,
		};
	}
	if reader.has_remaining() {
		bail!("{} trailing bytes", reader.remaining());
	}
	Ok(entries)
}
