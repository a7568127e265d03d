//! File operations: getattr, create, unlink, open, read, write, truncate,
//! utimens, mkdir, rmdir, readdir. Addressed by flat name or inode-table
//! slot index; `fs.rs` is the thin layer that maps FUSE's ino-addressed
//! callbacks onto these.

use crate::alloc;
use crate::error::BmpfsError;
use crate::error::Result;
use crate::inode::now_secs;
use crate::inode::Inode;
use crate::inode::UNALLOCATED;
use crate::nameindex;
use crate::volume::Volume;
use crate::volume::BLOCK_SIZE;
use log::debug;
use log::warn;

/// A snapshot of an inode's metadata, independent of the on-disk layout,
/// used by `getattr`/`readdir` and handed to the FUSE layer for the
/// `FileAttr` projection.
#[derive(Clone, Copy)]
pub struct Attr {
	pub size: u64,
	pub mode: u32,
	pub uid: u32,
	pub gid: u32,
	pub atime: u64,
	pub mtime: u64,
	pub ctime: u64,
	pub is_dir: bool,
}

impl Attr {
	pub fn nlink(&self) -> u32 {
		if self.is_dir {
			2
		} else {
			1
		}
	}

	pub fn blocks(&self) -> u64 {
		(self.size + BLOCK_SIZE - 1) / BLOCK_SIZE
	}
}

fn ceil_blocks(size: u64) -> u32 {
	((size + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32
}

impl Volume {
	/// Synthesizes the attributes of the implicit root directory.
	pub fn root_attr(&self, uid: u32, gid: u32) -> Attr {
		let now = now_secs();
		Attr {
			size: 0,
			mode: (libc::S_IFDIR | 0o755) as u32,
			uid,
			gid,
			atime: now,
			mtime: now,
			ctime: now,
			is_dir: true,
		}
	}

	/// Returns the attributes of the file or directory in slot `slot`.
	pub fn attr(&self, slot: usize) -> Attr {
		let inode = &self.inodes[slot];
		Attr {
			size: inode.size,
			mode: inode.mode,
			uid: inode.uid,
			gid: inode.gid,
			atime: inode.accessed,
			mtime: inode.modified,
			ctime: inode.created,
			is_dir: inode.is_dir != 0,
		}
	}

	/// Resolves `path` (leading `/` optional) to its inode-table slot.
	/// `path == "/"` is not valid here; callers handle the root
	/// separately.
	pub fn resolve(&self, path: &str) -> Result<usize> {
		nameindex::validate(path)?;
		self.lookup(nameindex::strip_leading_slash(path))
	}

	fn init_entry(&mut self, slot: usize, name: &str, mode: u32, is_dir: bool, uid: u32, gid: u32) {
		let now = now_secs();
		let inode = &mut self.inodes[slot];
		*inode = Inode::empty();
		inode.set_name(nameindex::strip_leading_slash(name).as_bytes());
		inode.size = 0;
		inode.created = now;
		inode.modified = now;
		inode.accessed = now;
		inode.first_block = UNALLOCATED;
		inode.num_blocks = 0;
		inode.mode = mode;
		inode.uid = uid;
		inode.gid = gid;
		inode.is_dir = is_dir as u8;
	}

	/// Creates a new regular file. Fails `AlreadyExists` if the name is
	/// taken, `NoMem` if the inode table is full.
	pub fn create(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<usize> {
		nameindex::validate(path)?;
		let name = nameindex::strip_leading_slash(path);
		if self.lookup(name).is_ok() {
			return Err(BmpfsError::AlreadyExists);
		}
		let slot = self.find_free_slot()?;
		self.init_entry(slot, path, (libc::S_IFREG as u32) | (mode & 0o777), false, uid, gid);
		self.write_metadata()?;
		debug!("created file {path} at slot {slot}");
		Ok(slot)
	}

	/// Creates a new, empty directory. Directories never hold data
	/// blocks.
	pub fn mkdir(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<usize> {
		nameindex::validate(path)?;
		let name = nameindex::strip_leading_slash(path);
		if self.lookup(name).is_ok() {
			return Err(BmpfsError::AlreadyExists);
		}
		let slot = self.find_free_slot()?;
		self.init_entry(slot, path, (libc::S_IFDIR as u32) | (mode & 0o777), true, uid, gid);
		self.write_metadata()?;
		debug!("created directory {path} at slot {slot}");
		Ok(slot)
	}

	/// Frees a file's blocks and its inode-table slot.
	pub fn unlink(&mut self, path: &str) -> Result<()> {
		let slot = self.resolve(path)?;
		if self.inodes[slot].is_dir != 0 {
			return Err(BmpfsError::IsDir);
		}
		self.free_run(slot);
		self.inodes[slot].clear();
		self.write_metadata()?;
		debug!("unlinked {path}");
		Ok(())
	}

	/// Clears a directory's inode-table slot.
	///
	/// The original checks that the directory is empty before allowing
	/// removal; in this flat namespace no inode can ever live "inside"
	/// another directory, so that check is trivially satisfied and is
	/// intentionally not implemented as anything more than this comment.
	pub fn rmdir(&mut self, path: &str) -> Result<()> {
		let slot = self.resolve(path)?;
		if self.inodes[slot].is_dir == 0 {
			return Err(BmpfsError::NotDir);
		}
		self.inodes[slot].clear();
		self.write_metadata()?;
		debug!("removed directory {path}");
		Ok(())
	}

	/// Validates that `flags` are compatible with the target's mode bits
	/// and directory-ness, then bumps `accessed`.
	pub fn open(&mut self, slot: usize, want_read: bool, want_write: bool) -> Result<()> {
		let inode = &self.inodes[slot];
		if inode.is_dir != 0 && want_write {
			return Err(BmpfsError::Access);
		}
		if want_write && inode.mode & (libc::S_IWUSR as u32) == 0 {
			return Err(BmpfsError::Access);
		}
		if want_read && inode.mode & (libc::S_IRUSR as u32) == 0 {
			return Err(BmpfsError::Access);
		}
		self.inodes[slot].accessed = now_secs();
		self.write_metadata()?;
		Ok(())
	}

	/// Reads up to `size` bytes starting at `offset` from the file in
	/// `slot`.
	pub fn read(&mut self, slot: usize, offset: i64, size: usize) -> Result<Vec<u8>> {
		if self.inodes[slot].is_dir != 0 {
			return Err(BmpfsError::IsDir);
		}
		if offset < 0 {
			return Err(BmpfsError::Invalid);
		}
		self.inodes[slot].accessed = now_secs();

		let file_size = self.inodes[slot].size;
		let offset = offset as u64;
		if offset >= file_size {
			self.write_metadata()?;
			return Ok(Vec::new());
		}
		let size = (size as u64).min(file_size - offset) as usize;
		if size == 0 {
			self.write_metadata()?;
			return Ok(Vec::new());
		}

		let first_block = self.inodes[slot].first_block;
		let block_off = (offset % BLOCK_SIZE) as usize;
		let nb = ((size as u64 + block_off as u64 + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32;
		let first = first_block + (offset / BLOCK_SIZE) as u32;

		let mut scratch = vec![0u8; nb as usize * BLOCK_SIZE as usize];
		self.read_blocks(first, nb, &mut scratch)?;

		self.write_metadata()?;
		Ok(scratch[block_off..block_off + size].to_vec())
	}

	/// Writes `data` at `offset` into the file in `slot`, growing
	/// (relocating) its block run if necessary.
	pub fn write(&mut self, slot: usize, offset: i64, data: &[u8]) -> Result<usize> {
		if self.inodes[slot].is_dir != 0 {
			return Err(BmpfsError::IsDir);
		}
		if offset < 0 {
			return Err(BmpfsError::Invalid);
		}
		let offset = offset as u64;
		let new_size = offset
			.checked_add(data.len() as u64)
			.ok_or(BmpfsError::FileTooBig)?;

		let need = ceil_blocks(new_size);
		if need > self.inodes[slot].num_blocks {
			self.grow_run(slot, need)?;
		}

		let first_block = self.inodes[slot].first_block;
		let block_off = (offset % BLOCK_SIZE) as usize;
		let nb = ((data.len() as u64 + block_off as u64 + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32;
		let first = first_block + (offset / BLOCK_SIZE) as u32;

		let mut scratch = vec![0u8; nb as usize * BLOCK_SIZE as usize];
		let whole_blocks = block_off == 0 && data.len() as u64 % BLOCK_SIZE == 0;
		if !whole_blocks {
			self.read_blocks(first, nb, &mut scratch)?;
		}
		scratch[block_off..block_off + data.len()].copy_from_slice(data);
		self.write_blocks(first, nb, &scratch)?;

		if new_size > self.inodes[slot].size {
			self.inodes[slot].size = new_size;
		}
		self.inodes[slot].modified = now_secs();
		self.write_metadata()?;
		Ok(data.len())
	}

	/// Truncates (or extends) the file in `slot` to `new_size` bytes.
	pub fn truncate(&mut self, slot: usize, new_size: i64) -> Result<()> {
		if self.inodes[slot].is_dir != 0 {
			return Err(BmpfsError::IsDir);
		}
		if new_size < 0 {
			return Err(BmpfsError::Invalid);
		}
		let new_size = new_size as u64;
		let num_blocks = self.inodes[slot].num_blocks;
		let need = ceil_blocks(new_size);

		if new_size == 0 {
			self.free_run(slot);
			self.inodes[slot].first_block = UNALLOCATED;
			self.inodes[slot].num_blocks = 0;
			self.inodes[slot].size = 0;
		} else if need < num_blocks {
			let first_block = self.inodes[slot].first_block;
			alloc::mark(&mut self.bitmap, first_block + need, num_blocks - need, 0);
			self.inodes[slot].num_blocks = need;
			self.inodes[slot].size = new_size;
		} else if need > num_blocks {
			self.grow_run(slot, need)?;
			self.inodes[slot].size = new_size;
		} else {
			self.inodes[slot].size = new_size;
		}
		self.inodes[slot].modified = now_secs();
		self.write_metadata()?;
		Ok(())
	}

	/// Sets access and/or modification times. A field left `None` is left
	/// unchanged (the kernel passes `None` for a timestamp it isn't
	/// updating, e.g. `touch -a`); if neither is given, both are set to
	/// now.
	pub fn utimens(&mut self, slot: usize, atime: Option<u64>, mtime: Option<u64>) -> Result<()> {
		if atime.is_none() && mtime.is_none() {
			let now = now_secs();
			self.inodes[slot].accessed = now;
			self.inodes[slot].modified = now;
		} else {
			if let Some(atime) = atime {
				self.inodes[slot].accessed = atime;
			}
			if let Some(mtime) = mtime {
				self.inodes[slot].modified = mtime;
			}
		}
		self.write_metadata()?;
		Ok(())
	}

	/// The `(first_block, num_blocks)` run owned by the file in `slot`.
	/// Exposed for tests that check allocator invariants directly.
	pub fn block_run(&self, slot: usize) -> (u32, u32) {
		let inode = &self.inodes[slot];
		(inode.first_block, inode.num_blocks)
	}

	/// Lists every non-empty inode-table entry as `(name, slot)`.
	pub fn readdir_entries(&self) -> Vec<(String, usize)> {
		self.inodes
			.iter()
			.enumerate()
			.filter(|(_, inode)| !inode.is_free())
			.map(|(i, inode)| (String::from_utf8_lossy(inode.name_bytes()).into_owned(), i))
			.collect()
	}

	/// Frees the bitmap run owned by the file in `slot`, if any. A no-op
	/// when the file holds no blocks.
	fn free_run(&mut self, slot: usize) {
		let inode = &self.inodes[slot];
		if inode.num_blocks > 0 {
			alloc::mark(&mut self.bitmap, inode.first_block, inode.num_blocks, 0);
		}
	}

	/// The growth policy: relocates the file in `slot` to a new
	/// contiguous run of `need` blocks, copying over any existing data.
	///
	/// The new run is marked used before the old run is freed, so a
	/// crash between the two steps leaks blocks rather than corrupting
	/// the bitmap (a leaked block is recoverable by an offline scan; a
	/// bitmap claiming two files share a block is not).
	fn grow_run(&mut self, slot: usize, need: u32) -> Result<()> {
		let new_start = alloc::find_free_run(&self.bitmap, need as usize).ok_or_else(|| {
			warn!("slot {slot} needs {need} blocks but no free run is that long");
			BmpfsError::NoSpace
		})?;

		let old_first = self.inodes[slot].first_block;
		let old_count = self.inodes[slot].num_blocks;

		if old_count > 0 {
			let mut scratch = vec![0u8; old_count as usize * BLOCK_SIZE as usize];
			self.read_blocks(old_first, old_count, &mut scratch)?;
			self.write_blocks(new_start, old_count, &scratch)?;
		}

		alloc::mark(&mut self.bitmap, new_start, need, 1);
		if old_count > 0 {
			alloc::mark(&mut self.bitmap, old_first, old_count, 0);
		}

		self.inodes[slot].first_block = new_start;
		self.inodes[slot].num_blocks = need;
		debug!("relocated slot {slot} to block {new_start} ({need} blocks)");
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::volume::Volume;
	use std::path::Path;

	fn mount(dir: &Path) -> Volume {
		Volume::mount(&dir.join("image.bmp"), 64, 64).unwrap()
	}

	#[test]
	fn create_write_read() {
		let dir = tempfile::tempdir().unwrap();
		let mut v = mount(dir.path());

		let slot = v.create("/a", 0o644, 1000, 1000).unwrap();
		assert_eq!(v.write(slot, 0, b"hello").unwrap(), 5);
		assert_eq!(v.read(slot, 0, 5).unwrap(), b"hello");
		assert_eq!(v.attr(slot).size, 5);
	}

	#[test]
	fn grow_induced_relocation() {
		let dir = tempfile::tempdir().unwrap();
		let mut v = mount(dir.path());

		let slot = v.create("/b", 0o644, 0, 0).unwrap();
		let chunk = vec![0x41u8; 512];
		v.write(slot, 0, &chunk).unwrap();
		let (f1, n1) = v.block_run(slot);
		assert_eq!(n1, 1);
		assert_eq!(v.bitmap()[f1 as usize], 1);

		v.write(slot, 512, &chunk).unwrap();
		let (f2, n2) = v.block_run(slot);
		assert_eq!(n2, 2);
		assert_eq!(v.bitmap()[f1 as usize], 0);
		assert_eq!(v.bitmap()[f2 as usize], 1);
		assert_eq!(v.bitmap()[f2 as usize + 1], 1);

		let data = v.read(slot, 0, 1024).unwrap();
		assert_eq!(data.len(), 1024);
		assert!(data.iter().all(|&b| b == 0x41));
	}

	#[test]
	fn truncate_shrink_preserves_prefix() {
		let dir = tempfile::tempdir().unwrap();
		let mut v = mount(dir.path());

		let slot = v.create("/c", 0o644, 0, 0).unwrap();
		let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
		v.write(slot, 0, &body).unwrap();

		v.truncate(slot, 100).unwrap();
		assert_eq!(v.attr(slot).size, 100);
		let data = v.read(slot, 0, 1000).unwrap();
		assert_eq!(data, &body[..100]);

		let (_, n) = v.block_run(slot);
		assert_eq!(n, 1);
	}

	#[test]
	fn write_past_capacity_is_enospc() {
		let dir = tempfile::tempdir().unwrap();
		let mut v = mount(dir.path());
		let total = v.total_blocks() as usize;

		let slot = v.create("/d", 0o644, 0, 0).unwrap();
		let data = vec![0u8; total * BLOCK_SIZE as usize + 1];
		let err = v.write(slot, 0, &data).unwrap_err();
		assert!(matches!(err, BmpfsError::NoSpace));
	}

	#[test]
	fn persists_across_remount() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.bmp");

		let mut v = Volume::mount(&path, 64, 64).unwrap();
		let slot = v.create("/d", 0o644, 0, 0).unwrap();
		v.write(slot, 0, b"persist").unwrap();
		v.unmount().unwrap();

		let v = Volume::mount(&path, 64, 64).unwrap();
		let names: Vec<_> = v.readdir_entries().into_iter().map(|(n, _)| n).collect();
		assert!(names.contains(&"d".to_string()));
		let slot = v.lookup("d").unwrap();
		assert_eq!(v.attr(slot).size, 7);
	}

	#[test]
	fn unlink_frees_blocks_for_reuse() {
		let dir = tempfile::tempdir().unwrap();
		let mut v = mount(dir.path());

		let slot = v.create("/e", 0o644, 0, 0).unwrap();
		v.write(slot, 0, &vec![1u8; 512]).unwrap();
		let (first, count) = v.block_run(slot);
		v.unlink("/e").unwrap();
		assert!(v.bitmap()[first as usize..(first + count) as usize].iter().all(|&b| b == 0));

		let slot2 = v.create("/f", 0o644, 0, 0).unwrap();
		v.write(slot2, 0, &vec![2u8; 512]).unwrap();
		let (second_first, _) = v.block_run(slot2);
		assert_eq!(second_first, first);
	}
}
