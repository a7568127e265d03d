//! BMP framing: the 14-byte file header and 40-byte info header that make
//! the backing file a valid 24-bit uncompressed BMP, plus the provisioner
//! that creates a fresh image when the backing file is absent.

use crate::error::BmpfsError;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::mem::size_of;
use std::path::Path;
use utils::util::reinterpret;
use utils::util::reinterpret_mut;

/// BMP signature ("BM" in little endian).
const BMP_SIGNATURE: u16 = 0x4D42;

/// Default width, in pixels, of a freshly provisioned image.
pub const DEFAULT_WIDTH: i32 = 2048;
/// Default height, in pixels, of a freshly provisioned image.
pub const DEFAULT_HEIGHT: i32 = 2048;

/// The 14-byte BMP file header.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FileHeader {
	/// Magic number, must be [`BMP_SIGNATURE`].
	pub signature: u16,
	/// Size of the whole file in bytes.
	pub filesize: u32,
	/// Reserved, always zero.
	pub reserved1: u16,
	/// Reserved, always zero.
	pub reserved2: u16,
	/// Offset of the pixel-data region from the start of the file.
	pub data_offset: u32,
}

/// The 40-byte BMP info header (BITMAPINFOHEADER).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct InfoHeader {
	/// Size of this header, always 40.
	pub header_size: u32,
	/// Image width in pixels.
	pub width: i32,
	/// Image height in pixels.
	pub height: i32,
	/// Number of color planes, always 1.
	pub planes: u16,
	/// Bits per pixel, always 24 for this filesystem.
	pub bits_per_pixel: u16,
	/// Compression method, always 0 (none).
	pub compression: u32,
	/// Size in bytes of the pixel-data region.
	pub image_size: u32,
	/// Horizontal resolution, pixels per meter.
	pub x_ppm: i32,
	/// Vertical resolution, pixels per meter.
	pub y_ppm: i32,
	/// Number of colors in the palette, 0 means all.
	pub colors_used: u32,
	/// Number of important colors, 0 means all are important.
	pub colors_important: u32,
}

const _: () = assert!(size_of::<FileHeader>() == 14);
const _: () = assert!(size_of::<InfoHeader>() == 40);

/// Computes the padded row size, in bytes, for a `width`-pixel-wide row of
/// 24-bit pixels. Every BMP row is padded up to a multiple of 4 bytes.
pub fn row_size(width: i32) -> usize {
	(((width as i64 * 3) + 3) & !3) as usize
}

/// Reads and validates the file header and info header from `file`, which
/// must be positioned (or is seeked here) at offset 0.
///
/// Returns `InvalidSignature` if the magic number doesn't match, or if the
/// declared `image_size` doesn't match the normative padded row-size
/// computation.
pub fn read_headers(file: &mut File) -> Result<(FileHeader, InfoHeader), BmpfsError> {
	file.seek(SeekFrom::Start(0))?;

	let mut file_header: FileHeader = unsafe { std::mem::zeroed() };
	file.read_exact(reinterpret_mut(&mut file_header))?;
	if file_header.signature != BMP_SIGNATURE {
		return Err(BmpfsError::InvalidSignature);
	}

	let mut info_header: InfoHeader = unsafe { std::mem::zeroed() };
	file.read_exact(reinterpret_mut(&mut info_header))?;

	let expected = row_size(info_header.width) as u64 * info_header.height as u64;
	if info_header.image_size as u64 != expected {
		return Err(BmpfsError::InvalidSignature);
	}

	Ok((file_header, info_header))
}

/// Writes the file header and info header to `file` at offset 0.
pub fn write_headers(
	file: &mut File,
	file_header: &FileHeader,
	info_header: &InfoHeader,
) -> io::Result<()> {
	file.seek(SeekFrom::Start(0))?;
	file.write_all(reinterpret(file_header))?;
	file.write_all(reinterpret(info_header))?;
	Ok(())
}

/// Creates a new, zero-filled 24-bit BMP image at `path` with the given
/// `width`x`height`, followed by a zeroed metadata region
/// (`metadata_size` bytes: an empty free-block bitmap and an empty inode
/// table).
///
/// This is invoked once at mount, when the configured backing file does
/// not exist yet.
pub fn provision(path: &Path, width: i32, height: i32, metadata_size: usize) -> Result<(), BmpfsError> {
	let data_size = row_size(width) * height as usize;
	let data_offset = (size_of::<FileHeader>() + size_of::<InfoHeader>()) as u32;
	let filesize = data_offset as u64 + data_size as u64;

	let file_header = FileHeader {
		signature: BMP_SIGNATURE,
		filesize: filesize as u32,
		reserved1: 0,
		reserved2: 0,
		data_offset,
	};
	let info_header = InfoHeader {
		header_size: size_of::<InfoHeader>() as u32,
		width,
		height,
		planes: 1,
		bits_per_pixel: 24,
		compression: 0,
		image_size: data_size as u32,
		x_ppm: 2835,
		y_ppm: 2835,
		colors_used: 0,
		colors_important: 0,
	};

	let mut file = OpenOptions::new()
		.create_new(true)
		.read(true)
		.write(true)
		.open(path)
		.map_err(|e| match e.kind() {
			io::ErrorKind::PermissionDenied => BmpfsError::PermissionDenied,
			_ => BmpfsError::Io(e),
		})?;

	write_headers(&mut file, &file_header, &info_header)?;

	let zeros = vec![0u8; data_size];
	file.write_all(&zeros)?;

	file.seek(SeekFrom::Start(data_offset as u64))?;
	let zeros = vec![0u8; metadata_size];
	file.write_all(&zeros)?;
	file.flush()?;

	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn row_size_pads_to_four_bytes() {
		assert_eq!(row_size(1), 4);
		assert_eq!(row_size(4), 12);
		assert_eq!(row_size(2048), 6144);
	}

	#[test]
	fn rejects_bad_signature() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bad.bmp");
		std::fs::write(&path, [0u8; 54]).unwrap();

		let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
		let err = read_headers(&mut file).unwrap_err();
		assert!(matches!(err, BmpfsError::InvalidSignature));
	}

	#[test]
	fn header_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("fresh.bmp");
		let metadata_size = 16;
		provision(&path, 64, 64, metadata_size).unwrap();

		let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
		let (file_header, info_header) = read_headers(&mut file).unwrap();
		assert_eq!(file_header.signature, BMP_SIGNATURE);
		assert_eq!(info_header.width, 64);
		assert_eq!(info_header.height, 64);
		assert_eq!(info_header.image_size as usize, row_size(64) * 64);
	}
}
