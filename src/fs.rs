//! The `fuser::Filesystem` adapter: translates FUSE's ino/parent+name
//! addressing and reply types onto the slot-addressed operations in
//! `ops.rs`.
//!
//! Inode-table slot `i` (0-based) is always exposed as FUSE ino `i + 2`;
//! ino `1` is the implicit root directory, which has no inode-table
//! entry of its own (spec invariant 6).

use crate::ops::Attr;
use crate::volume::Volume;
use fuser::FileAttr;
use fuser::FileType;
use fuser::Filesystem;
use fuser::ReplyAttr;
use fuser::ReplyCreate;
use fuser::ReplyData;
use fuser::ReplyDirectory;
use fuser::ReplyEmpty;
use fuser::ReplyEntry;
use fuser::ReplyOpen;
use fuser::ReplyWrite;
use fuser::Request;
use fuser::TimeOrNow;
use libc::ENOENT;
use log::error;
use std::ffi::OsStr;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

fn ino_to_slot(ino: u64) -> Option<usize> {
	if ino <= 1 {
		None
	} else {
		Some((ino - 2) as usize)
	}
}

fn slot_to_ino(slot: usize) -> u64 {
	slot as u64 + 2
}

fn secs_to_system_time(secs: u64) -> SystemTime {
	UNIX_EPOCH + Duration::from_secs(secs)
}

fn system_time_to_secs(t: SystemTime) -> u64 {
	t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn to_file_attr(ino: u64, attr: &Attr) -> FileAttr {
	FileAttr {
		ino,
		size: attr.size,
		blocks: attr.blocks(),
		atime: secs_to_system_time(attr.atime),
		mtime: secs_to_system_time(attr.mtime),
		ctime: secs_to_system_time(attr.ctime),
		crtime: secs_to_system_time(attr.ctime),
		kind: if attr.is_dir { FileType::Directory } else { FileType::RegularFile },
		perm: (attr.mode & 0o7777) as u16,
		nlink: attr.nlink(),
		uid: attr.uid,
		gid: attr.gid,
		rdev: 0,
		blksize: crate::volume::BLOCK_SIZE as u32,
		flags: 0,
	}
}

/// The FUSE-facing filesystem. Owns the single [`Volume`] backing the
/// mount; every request serializes through `fuser`'s single-threaded
/// session loop, so no further locking is needed (spec §5).
pub struct Bmpfs {
	volume: Volume,
}

impl Bmpfs {
	pub fn new(volume: Volume) -> Self {
		Self { volume }
	}

	fn attr_for(&self, ino: u64, uid: u32, gid: u32) -> Option<(u64, Attr)> {
		match ino_to_slot(ino) {
			None => Some((ROOT_INO, self.volume.root_attr(uid, gid))),
			Some(slot) if slot < self.volume.inode_count() && !self.volume.slot_is_free(slot) => {
				Some((ino, self.volume.attr(slot)))
			}
			Some(_) => None,
		}
	}
}

impl Filesystem for Bmpfs {
	fn destroy(&mut self) {
		if let Err(e) = self.volume.write_metadata() {
			error!("final metadata flush on unmount failed: {e}");
		}
	}

	fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
		if parent != ROOT_INO {
			reply.error(ENOENT);
			return;
		}
		let Some(name) = name.to_str() else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.lookup(name) {
			Ok(slot) => {
				let attr = to_file_attr(slot_to_ino(slot), &self.volume.attr(slot));
				reply.entry(&TTL, &attr, 0);
			}
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
		match self.attr_for(ino, req.uid(), req.gid()) {
			Some((ino, attr)) => reply.attr(&TTL, &to_file_attr(ino, &attr)),
			None => reply.error(ENOENT),
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn setattr(
		&mut self,
		req: &Request<'_>,
		ino: u64,
		_mode: Option<u32>,
		_uid: Option<u32>,
		_gid: Option<u32>,
		size: Option<u64>,
		atime: Option<TimeOrNow>,
		mtime: Option<TimeOrNow>,
		_ctime: Option<SystemTime>,
		_fh: Option<u64>,
		_crtime: Option<SystemTime>,
		_chgtime: Option<SystemTime>,
		_bkuptime: Option<SystemTime>,
		_flags: Option<u32>,
		reply: ReplyAttr,
	) {
		let Some(slot) = ino_to_slot(ino) else {
			reply.error(ENOENT);
			return;
		};

		if let Some(size) = size {
			if let Err(e) = self.volume.truncate(slot, size as i64) {
				reply.error(e.to_errno());
				return;
			}
		}

		if atime.is_some() || mtime.is_some() {
			let to_secs = |t: TimeOrNow| match t {
				TimeOrNow::SpecificTime(t) => system_time_to_secs(t),
				TimeOrNow::Now => crate::inode::now_secs(),
			};
			if let Err(e) = self.volume.utimens(slot, atime.map(to_secs), mtime.map(to_secs)) {
				reply.error(e.to_errno());
				return;
			}
		}

		match self.attr_for(ino, req.uid(), req.gid()) {
			Some((ino, attr)) => reply.attr(&TTL, &to_file_attr(ino, &attr)),
			None => reply.error(ENOENT),
		}
	}

	fn create(
		&mut self,
		req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		flags: i32,
		reply: ReplyCreate,
	) {
		if parent != ROOT_INO {
			reply.error(ENOENT);
			return;
		}
		let Some(name) = name.to_str() else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.create(name, mode, req.uid(), req.gid()) {
			Ok(slot) => {
				let ino = slot_to_ino(slot);
				let attr = to_file_attr(ino, &self.volume.attr(slot));
				reply.created(&TTL, &attr, 0, ino, flags as u32);
			}
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
		if parent != ROOT_INO {
			reply.error(ENOENT);
			return;
		}
		let Some(name) = name.to_str() else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.mkdir(name, mode, req.uid(), req.gid()) {
			Ok(slot) => {
				let ino = slot_to_ino(slot);
				let attr = to_file_attr(ino, &self.volume.attr(slot));
				reply.entry(&TTL, &attr, 0);
			}
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		if parent != ROOT_INO {
			reply.error(ENOENT);
			return;
		}
		let Some(name) = name.to_str() else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.unlink(name) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		if parent != ROOT_INO {
			reply.error(ENOENT);
			return;
		}
		let Some(name) = name.to_str() else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.rmdir(name) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
		let Some(slot) = ino_to_slot(ino) else {
			reply.error(ENOENT);
			return;
		};
		let accmode = flags & libc::O_ACCMODE;
		let want_read = accmode == libc::O_RDONLY || accmode == libc::O_RDWR;
		let want_write = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;
		match self.volume.open(slot, want_read, want_write) {
			Ok(()) => reply.opened(ino, 0),
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn read(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyData,
	) {
		let Some(slot) = ino_to_slot(ino) else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.read(slot, offset, size as usize) {
			Ok(data) => reply.data(&data),
			Err(e) => reply.error(e.to_errno()),
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn write(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyWrite,
	) {
		let Some(slot) = ino_to_slot(ino) else {
			reply.error(ENOENT);
			return;
		};
		match self.volume.write(slot, offset, data) {
			Ok(n) => reply.written(n as u32),
			Err(e) => reply.error(e.to_errno()),
		}
	}

	fn fsync(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
		if ino_to_slot(ino).is_none() && ino != ROOT_INO {
			reply.error(ENOENT);
			return;
		}
		if let Err(e) = self.volume.write_metadata() {
			error!("fsync: metadata flush failed: {e}");
			reply.error(e.to_errno());
			return;
		}
		match self.volume.sync(datasync) {
			Ok(()) => reply.ok(),
			Err(e) => {
				error!("fsync failed: {e}");
				reply.error(e.to_errno());
			}
		}
	}

	fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
		if ino != ROOT_INO {
			reply.error(ENOENT);
			return;
		}

		let mut entries = vec![(ROOT_INO, FileType::Directory, ".".to_string()), (ROOT_INO, FileType::Directory, "..".to_string())];
		for (name, slot) in self.volume.readdir_entries() {
			let kind = if self.volume.attr(slot).is_dir { FileType::Directory } else { FileType::RegularFile };
			entries.push((slot_to_ino(slot), kind, name));
		}

		for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
			if reply.add(ino, (i + 1) as i64, kind, name) {
				break;
			}
		}
		reply.ok();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn ino_slot_bijection() {
		for slot in 0..1000usize {
			assert_eq!(ino_to_slot(slot_to_ino(slot)), Some(slot));
		}
	}

	#[test]
	fn root_ino_has_no_slot() {
		assert_eq!(ino_to_slot(ROOT_INO), None);
	}
}
