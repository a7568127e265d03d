//! `bmpfs`: a FUSE filesystem whose entire backing store is a single
//! 24-bit BMP image.

mod alloc;
mod bmp;
mod error;
mod fs;
mod inode;
mod metadata;
mod nameindex;
mod ops;
mod volume;

use fs::Bmpfs;
use fuser::MountOption;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::exit;
use volume::Volume;

/// Prints the command's usage.
fn print_usage() {
	eprintln!("Usage: bmpfs <mountpoint> -o <options>");
	eprintln!();
	eprintln!("Options (comma-separated, passed to -o):");
	eprintln!(" image=<path>:\tpath to the backing BMP image (required)");
	eprintln!("\t\tprovisioned as a fresh 2048x2048 image if it doesn't exist");
	eprintln!(" ro:\t\tmount read-only");
	eprintln!(" allow_other:\tallow other users to access the mount");
	eprintln!(" auto_unmount:\tunmount automatically when bmpfs exits");
}

struct Options {
	mountpoint: PathBuf,
	image: PathBuf,
	read_only: bool,
	allow_other: bool,
	auto_unmount: bool,
}

fn parse_args(args: env::ArgsOs) -> Option<Options> {
	let mut mountpoint: Option<PathBuf> = None;
	let mut image: Option<PathBuf> = None;
	let mut read_only = false;
	let mut allow_other = false;
	let mut auto_unmount = false;

	let mut args = args.skip(1);
	while let Some(arg) = args.next() {
		match arg.to_str() {
			Some("-o") => {
				let spec = args.next()?;
				for opt in spec.to_str()?.split(',') {
					match opt.split_once('=') {
						Some(("image", path)) => image = Some(PathBuf::from(path)),
						None if opt == "ro" => read_only = true,
						None if opt == "allow_other" => allow_other = true,
						None if opt == "auto_unmount" => auto_unmount = true,
						_ => {
							eprintln!("bmpfs: unrecognized option `{opt}`");
							return None;
						}
					}
				}
			}
			Some("-h") | Some("--help") => {
				print_usage();
				exit(0);
			}
			_ if mountpoint.is_none() => mountpoint = Some(PathBuf::from(OsString::from(arg))),
			_ => {
				eprintln!("bmpfs: unexpected argument `{}`", arg.to_string_lossy());
				return None;
			}
		}
	}

	Some(Options {
		mountpoint: mountpoint?,
		image: image?,
		read_only,
		allow_other,
		auto_unmount,
	})
}

fn main() {
	env_logger::init();

	let opts = match parse_args(env::args_os()) {
		Some(opts) => opts,
		None => {
			print_usage();
			exit(1);
		}
	};

	let volume = match Volume::mount(&opts.image, bmp::DEFAULT_WIDTH, bmp::DEFAULT_HEIGHT) {
		Ok(v) => v,
		Err(e) => {
			eprintln!("bmpfs: cannot open {}: {e}", opts.image.display());
			exit(1);
		}
	};

	let mut options = vec![MountOption::FSName("bmpfs".to_string())];
	if opts.read_only {
		options.push(MountOption::RO);
	} else {
		options.push(MountOption::RW);
	}
	if opts.allow_other {
		options.push(MountOption::AllowOther);
	}
	if opts.auto_unmount {
		options.push(MountOption::AutoUnmount);
	}

	log::info!("mounting {} at {}", opts.image.display(), opts.mountpoint.display());
	if let Err(e) = fuser::mount2(Bmpfs::new(volume), &opts.mountpoint, &options) {
		eprintln!("bmpfs: mount failed: {e}");
		exit(1);
	}
}
