//! Offset/length pairs addressing sections and entries inside an archive file.

use std::fmt;
use std::ops::Range;

#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct ByteRange {
	pub offset: u64,
	pub length: u64,
}

impl ByteRange {
	pub fn new(offset: u64, length: u64) -> Self {
		Self { offset, length }
	}

	pub fn empty() -> Self {
		Self::default()
	}

	/// First byte after the range.
	pub fn end(&self) -> u64 {
		self.offset + self.length
	}

	/// Like [`ByteRange::end`], but `None` if the range runs past `u64::MAX`.
	pub fn checked_end(&self) -> Option<u64> {
		self.offset.checked_add(self.length)
	}

	/// Returns the range moved `offset` bytes towards the end of the file, e.g. to turn a
	/// section-relative range into an absolute one.
	pub fn get_shifted_forward(&self, offset: u64) -> Self {
		Self {
			offset: self.offset + offset,
			length: self.length,
		}
	}

	pub fn as_range_usize(&self) -> Range<usize> {
		Range {
			start: self.offset as usize,
			end: self.end() as usize,
		}
	}
}

impl fmt::Debug for ByteRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ByteRange[{},{}]", self.offset, self.length)
	}
}
