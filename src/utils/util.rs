//! This module implements utility functions.

use std::mem::size_of;
use std::slice;

/// Returns a byte slice over the raw representation of `val`.
///
/// `T` must be a type with a well-defined, packed on-disk layout (a
/// `#[repr(C, packed)]` struct); this function does not itself enforce that,
/// the caller is responsible for only using it on such types.
pub fn reinterpret<T>(val: &T) -> &[u8] {
	unsafe { slice::from_raw_parts(val as *const T as *const u8, size_of::<T>()) }
}

/// Mutable counterpart of [`reinterpret`].
pub fn reinterpret_mut<T>(val: &mut T) -> &mut [u8] {
	unsafe { slice::from_raw_parts_mut(val as *mut T as *mut u8, size_of::<T>()) }
}
