//! The on-image inode layout: a 309-byte fixed record describing one file
//! or directory. An empty `name[0]` marks a free slot.

use std::mem::size_of;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Sentinel meaning "no block allocated".
pub const UNALLOCATED: u32 = u32::MAX;

/// Maximum length of a stored name, including the terminating NUL.
pub const NAME_LEN: usize = 256;

/// A 309-byte, byte-packed, little-endian on-image file record.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Inode {
	/// NUL-padded name. An empty first byte marks a free slot.
	pub name: [u8; NAME_LEN],
	/// File size in bytes.
	pub size: u64,
	/// Creation time, seconds since the Unix epoch.
	pub created: u64,
	/// Last content modification time, seconds since the Unix epoch.
	pub modified: u64,
	/// Last access time, seconds since the Unix epoch.
	pub accessed: u64,
	/// Index of the first block of the file's run, or [`UNALLOCATED`].
	pub first_block: u32,
	/// Number of blocks in the file's run.
	pub num_blocks: u32,
	/// POSIX file-type and permission bits.
	pub mode: u32,
	/// Owner user id.
	pub uid: u32,
	/// Owner group id.
	pub gid: u32,
	/// 1 if this entry is a directory, 0 if a regular file.
	pub is_dir: u8,
}

const _: () = assert!(size_of::<Inode>() == 309);

impl Inode {
	/// A zeroed, free inode slot.
	pub const fn empty() -> Self {
		Self {
			name: [0; NAME_LEN],
			size: 0,
			created: 0,
			modified: 0,
			accessed: 0,
			first_block: UNALLOCATED,
			num_blocks: 0,
			mode: 0,
			uid: 0,
			gid: 0,
			is_dir: 0,
		}
	}

	/// Whether this slot is free (unused by any file).
	pub fn is_free(&self) -> bool {
		self.name[0] == 0
	}

	/// Returns the stored name as a byte slice, without the NUL padding.
	pub fn name_bytes(&self) -> &[u8] {
		let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		&self.name[..end]
	}

	/// Sets the stored name, truncating to [`NAME_LEN`] - 1 bytes if needed.
	///
	/// Callers are expected to have already validated the name's length
	/// (spec: paths of length >= 256 are rejected before this is called).
	pub fn set_name(&mut self, name: &[u8]) {
		self.name = [0; NAME_LEN];
		let len = name.len().min(NAME_LEN - 1);
		self.name[..len].copy_from_slice(&name[..len]);
	}

	/// Clears this slot back to free, releasing its name and all fields.
	pub fn clear(&mut self) {
		*self = Self::empty();
	}
}

/// Returns the current time as seconds since the Unix epoch.
pub fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
