//! Volume state: the open image handle, cached headers, derived geometry,
//! and the in-memory free-block bitmap and inode table for one mounted
//! BMP image.

use crate::bmp;
use crate::bmp::FileHeader;
use crate::bmp::InfoHeader;
use crate::error::BmpfsError;
use crate::error::Result;
use crate::inode::Inode;
use log::debug;
use log::info;
use std::fs::File;
use std::fs::OpenOptions;
use std::mem::size_of;
use std::path::Path;
use std::path::PathBuf;

/// Fixed block size in bytes (spec §3).
pub const BLOCK_SIZE: u64 = 512;
/// Fixed inode table capacity (spec §3).
pub const MAX_FILES: usize = 1000;

/// All state associated with one mounted BMP image.
///
/// Headers and derived geometry are computed once at mount and are
/// immutable for the life of the mount; the bitmap and inode table are
/// loaded at mount, mutated in memory by the file operations, and written
/// back wholesale after every successful mutation (see `metadata.rs`).
pub struct Volume {
	/// Open read+write handle to the backing image. Every I/O seeks
	/// absolutely, so its cursor position carries no meaning between
	/// calls.
	pub(crate) image: File,
	/// Path to the backing image, kept for diagnostics.
	pub(crate) path: PathBuf,
	/// Cached file header, as read at mount.
	pub(crate) file_header: FileHeader,
	/// Cached info header, as read at mount.
	pub(crate) info_header: InfoHeader,

	/// Size, in bytes, of the pixel-data region (`row_size * height`).
	pub(crate) data_size: u64,
	/// Total number of `BLOCK_SIZE`-byte blocks in the pixel-data region.
	pub(crate) total_blocks: u32,
	/// Size, in bytes, of the metadata region (bitmap + inode table).
	pub(crate) metadata_size: u64,

	/// One byte per block: 0 free, 1 used.
	pub(crate) bitmap: Vec<u8>,
	/// Fixed-capacity inode table, `MAX_FILES` entries.
	pub(crate) inodes: Vec<Inode>,
}

impl Volume {
	/// Opens the backing image at `path`, provisioning a fresh
	/// `width`x`height` image first if it doesn't exist, then loads
	/// headers, geometry and metadata.
	pub fn mount(path: &Path, width: i32, height: i32) -> Result<Self> {
		if !path.exists() {
			info!("backing image {} not found, provisioning a new one", path.display());
			let row = bmp::row_size(width);
			let data_size = row * height as usize;
			let total_blocks = (data_size as u64 / BLOCK_SIZE) as usize;
			let metadata_size = total_blocks + MAX_FILES * size_of::<Inode>();
			bmp::provision(path, width, height, metadata_size)?;
		}

		let mut image = OpenOptions::new()
			.read(true)
			.write(true)
			.open(path)
			.map_err(|e| match e.kind() {
				std::io::ErrorKind::PermissionDenied => BmpfsError::PermissionDenied,
				std::io::ErrorKind::NotFound => BmpfsError::NotFound,
				_ => BmpfsError::Io(e),
			})?;

		let (file_header, info_header) = bmp::read_headers(&mut image)?;

		let row = bmp::row_size(info_header.width);
		let data_size = row as u64 * info_header.height as u64;
		let total_blocks = (data_size / BLOCK_SIZE) as u32;
		let metadata_size = total_blocks as u64 + (MAX_FILES * size_of::<Inode>()) as u64;

		debug!(
			"mounted {}: data_size={data_size} block_size={BLOCK_SIZE} max_files={MAX_FILES} total_blocks={total_blocks}",
			path.display()
		);

		let mut volume = Self {
			image,
			path: path.to_path_buf(),
			file_header,
			info_header,
			data_size,
			total_blocks,
			metadata_size,
			bitmap: vec![0; total_blocks as usize],
			inodes: vec![Inode::empty(); MAX_FILES],
		};
		volume.read_metadata()?;
		Ok(volume)
	}

	/// Number of slots in the inode table.
	pub fn inode_count(&self) -> usize {
		self.inodes.len()
	}

	/// The live free-block bitmap (0 free, 1 used). Exposed for tests
	/// that check allocator invariants directly.
	pub fn bitmap(&self) -> &[u8] {
		&self.bitmap
	}

	/// Total number of payload blocks in the mounted image.
	pub fn total_blocks(&self) -> u32 {
		self.total_blocks
	}

	/// Whether inode-table slot `slot` is unused.
	pub fn slot_is_free(&self, slot: usize) -> bool {
		self.inodes[slot].is_free()
	}

	/// Offset, from the start of the file, of the pixel-data region (byte
	/// 54 for the headers this filesystem always writes).
	pub(crate) fn data_offset(&self) -> u64 {
		self.file_header.data_offset as u64
	}

	/// Offset, from the start of the file, of the first payload block.
	pub(crate) fn first_block_offset(&self) -> u64 {
		self.data_offset() + self.metadata_size
	}

	/// Flushes metadata one last time and drops the open handle. Mirrors
	/// the original's `destroy` hook.
	pub fn unmount(mut self) -> Result<()> {
		self.write_metadata()?;
		Ok(())
	}

	/// Calls the host's file-data-sync (`datasync`) or full-sync primitive
	/// on the backing image's file descriptor.
	pub fn sync(&self, datasync: bool) -> Result<()> {
		if datasync {
			self.image.sync_data()?;
		} else {
			self.image.sync_all()?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn mount_rejects_bad_signature() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bad.bmp");
		std::fs::write(&path, [0u8; 54]).unwrap();

		let err = Volume::mount(&path, 64, 64).unwrap_err();
		assert!(matches!(err, BmpfsError::InvalidSignature));
	}

	#[test]
	fn mount_provisions_when_absent() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("new.bmp");
		assert!(!path.exists());

		let volume = Volume::mount(&path, 64, 64).unwrap();
		assert!(path.exists());
		assert_eq!(volume.total_blocks, (crate::bmp::row_size(64) as u64 * 64 / BLOCK_SIZE) as u32);
	}
}
