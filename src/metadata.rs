//! Metadata codec: (de)serializes the free-block bitmap and inode table
//! at the image's `data_offset`, immediately followed by each other with
//! no padding, no separators, no checksum and no version tag.

use crate::error::Result;
use crate::inode::Inode;
use crate::volume::Volume;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::mem::size_of;
use utils::util::reinterpret;
use utils::util::reinterpret_mut;

impl Volume {
	/// Reads `metadata_size` bytes from `data_offset` into the in-memory
	/// bitmap and inode table, replacing their current contents.
	pub fn read_metadata(&mut self) -> Result<()> {
		let mut buffer = vec![0u8; self.metadata_size as usize];
		self.image.seek(SeekFrom::Start(self.data_offset()))?;
		self.image.read_exact(&mut buffer)?;

		let bitmap_len = self.total_blocks as usize;
		self.bitmap.copy_from_slice(&buffer[..bitmap_len]);

		let inode_bytes = &buffer[bitmap_len..];
		for (inode, chunk) in self.inodes.iter_mut().zip(inode_bytes.chunks_exact(size_of::<Inode>())) {
			reinterpret_mut(inode).copy_from_slice(chunk);
		}

		Ok(())
	}

	/// Composes the live bitmap and inode table into a single buffer,
	/// writes it back at `data_offset`, and flushes the stream.
	///
	/// Every operation that mutates the bitmap or inode table must call
	/// this before reporting success to the caller.
	pub fn write_metadata(&mut self) -> Result<()> {
		let mut buffer = Vec::with_capacity(self.metadata_size as usize);
		buffer.extend_from_slice(&self.bitmap);
		for inode in &self.inodes {
			buffer.extend_from_slice(reinterpret(inode));
		}

		self.image.seek(SeekFrom::Start(self.data_offset()))?;
		self.image.write_all(&buffer)?;
		self.image.flush()?;

		Ok(())
	}
}

#[cfg(test)]
mod test {
	use crate::volume::Volume;
	use std::path::Path;

	fn fresh_volume(dir: &Path) -> Volume {
		let path = dir.join("test.bmp");
		Volume::mount(&path, 64, 64).unwrap()
	}

	#[test]
	fn round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let mut volume = fresh_volume(dir.path());

		volume.bitmap[0] = 1;
		volume.bitmap[3] = 1;
		volume.inodes[0].set_name(b"a");
		volume.inodes[0].size = 42;
		volume.write_metadata().unwrap();

		// Reload from disk into a throwaway volume sharing the same image.
		volume.read_metadata().unwrap();
		assert_eq!(volume.bitmap[0], 1);
		assert_eq!(volume.bitmap[3], 1);
		assert_eq!(volume.inodes[0].name_bytes(), b"a");
		assert_eq!(volume.inodes[0].size, 42);
	}
}
