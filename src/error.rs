//! Error taxonomy shared by every component of the filesystem core.
//!
//! FUSE replies carry a raw `i32` errno, not a `Result` type, so this is a
//! thin enum rather than something built on `anyhow`/`thiserror`: every
//! variant maps directly to one of the POSIX errors bmpfs is allowed to
//! return (spec §7).

use std::fmt;
use std::io;

/// A failure from any layer of the filesystem core.
#[derive(Debug)]
pub enum BmpfsError {
	/// The BMP signature didn't match, or the declared image size disagreed
	/// with the normative row-size computation.
	InvalidSignature,
	/// A read, write, seek or flush came up short, or failed outright.
	Io(io::Error),
	/// Allocation failure, or no free inode slot.
	NoMem,
	/// The backing file or its containing directory isn't writable.
	PermissionDenied,
	/// No such file.
	NotFound,
	/// A file by that name already exists.
	AlreadyExists,
	/// The operation does not apply to directories.
	IsDir,
	/// The operation only applies to directories.
	NotDir,
	/// Open flags are incompatible with the inode's permission bits.
	Access,
	/// Path is 256 bytes or longer.
	NameTooLong,
	/// Malformed path (nested, negative offset, negative size, ...).
	Invalid,
	/// No contiguous free run of the requested length.
	NoSpace,
	/// The requested size overflows the filesystem's size types.
	FileTooBig,
}

impl fmt::Display for BmpfsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::InvalidSignature => write!(f, "invalid BMP signature"),
			Self::Io(e) => write!(f, "I/O error: {e}"),
			Self::NoMem => write!(f, "out of memory"),
			Self::PermissionDenied => write!(f, "permission denied"),
			Self::NotFound => write!(f, "no such file"),
			Self::AlreadyExists => write!(f, "file already exists"),
			Self::IsDir => write!(f, "is a directory"),
			Self::NotDir => write!(f, "not a directory"),
			Self::Access => write!(f, "access denied"),
			Self::NameTooLong => write!(f, "name too long"),
			Self::Invalid => write!(f, "invalid argument"),
			Self::NoSpace => write!(f, "no space left on device"),
			Self::FileTooBig => write!(f, "file too big"),
		}
	}
}

impl std::error::Error for BmpfsError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for BmpfsError {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}

impl BmpfsError {
	/// Maps this error to the POSIX errno value FUSE should reply with.
	pub fn to_errno(&self) -> i32 {
		match self {
			Self::InvalidSignature => libc::EIO,
			Self::Io(_) => libc::EIO,
			Self::NoMem => libc::ENOMEM,
			Self::PermissionDenied => libc::EACCES,
			Self::NotFound => libc::ENOENT,
			Self::AlreadyExists => libc::EEXIST,
			Self::IsDir => libc::EISDIR,
			Self::NotDir => libc::ENOTDIR,
			Self::Access => libc::EACCES,
			Self::NameTooLong => libc::ENAMETOOLONG,
			Self::Invalid => libc::EINVAL,
			Self::NoSpace => libc::ENOSPC,
			Self::FileTooBig => libc::EFBIG,
		}
	}
}

/// Convenience alias used throughout the filesystem core.
pub type Result<T> = std::result::Result<T, BmpfsError>;

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn errno_mapping() {
		let cases: &[(BmpfsError, i32)] = &[
			(BmpfsError::InvalidSignature, libc::EIO),
			(BmpfsError::NoMem, libc::ENOMEM),
			(BmpfsError::PermissionDenied, libc::EACCES),
			(BmpfsError::NotFound, libc::ENOENT),
			(BmpfsError::AlreadyExists, libc::EEXIST),
			(BmpfsError::IsDir, libc::EISDIR),
			(BmpfsError::NotDir, libc::ENOTDIR),
			(BmpfsError::Access, libc::EACCES),
			(BmpfsError::NameTooLong, libc::ENAMETOOLONG),
			(BmpfsError::Invalid, libc::EINVAL),
			(BmpfsError::NoSpace, libc::ENOSPC),
			(BmpfsError::FileTooBig, libc::EFBIG),
		];
		for (err, expected) in cases {
			assert_eq!(err.to_errno(), *expected);
		}
	}
}
