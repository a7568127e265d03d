//! Block I/O: translates (block index, count) pairs into absolute byte
//! offsets past the metadata region and performs whole-block-range reads
//! and writes.
//!
//! This layer does not bounds-check against `total_blocks`; callers
//! guarantee valid runs via the allocator (`alloc.rs`).

use crate::error::Result;
use crate::volume::Volume;
use crate::volume::BLOCK_SIZE;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

impl Volume {
	/// Absolute byte offset of block `index`.
	pub(crate) fn block_offset(&self, index: u32) -> u64 {
		self.first_block_offset() + index as u64 * BLOCK_SIZE
	}

	/// Reads `count` whole blocks starting at `start` into `buf`, which
	/// must be exactly `count * BLOCK_SIZE` bytes.
	pub(crate) fn read_blocks(&mut self, start: u32, count: u32, buf: &mut [u8]) -> Result<()> {
		debug_assert_eq!(buf.len() as u64, count as u64 * BLOCK_SIZE);
		self.image.seek(SeekFrom::Start(self.block_offset(start)))?;
		self.image.read_exact(buf)?;
		Ok(())
	}

	/// Writes `count` whole blocks starting at `start` from `buf`, then
	/// flushes the stream.
	pub(crate) fn write_blocks(&mut self, start: u32, count: u32, buf: &[u8]) -> Result<()> {
		debug_assert_eq!(buf.len() as u64, count as u64 * BLOCK_SIZE);
		self.image.seek(SeekFrom::Start(self.block_offset(start)))?;
		self.image.write_all(buf)?;
		self.image.flush()?;
		Ok(())
	}
}
