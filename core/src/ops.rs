//! # Plain byte operations
//!
//! Set/zero/copy/move/compare wrappers with defined boundary behavior: a
//! zero-length request is always a successful no-op even with null
//! pointers, and a null pointer with nonzero length is a programming
//! error that produces a diagnostic and a defined failure value, never a
//! wild access.

use core::cmp::Ordering;
use core::ptr;
use core::slice;

/// Fill `count` bytes at `dst` with `value`.
///
/// # Safety
///
/// When `dst` is non-null and `count` is nonzero, `dst` must be valid for
/// writes of `count` bytes.
pub unsafe fn set_bytes(dst: *mut u8, count: usize, value: u8) {
    if count == 0 {
        return;
    }
    if dst.is_null() {
        log::error!("set_bytes called with null pointer for {} bytes", count);
        return;
    }
    // SAFETY: non-null and nonzero checked above; validity is the caller's
    // contract.
    unsafe { ptr::write_bytes(dst, value, count) };
}

/// Zero `count` bytes at `dst`.
///
/// # Safety
///
/// Same contract as [`set_bytes`].
pub unsafe fn zero_bytes(dst: *mut u8, count: usize) {
    unsafe { set_bytes(dst, count, 0) };
}

/// Copy `count` bytes from `src` to `dst`. The ranges must not overlap;
/// use [`move_bytes`] when they may.
///
/// # Safety
///
/// When both pointers are non-null and `count` is nonzero, `src` must be
/// valid for reads and `dst` for writes of `count` bytes, and the ranges
/// must be disjoint.
pub unsafe fn copy_bytes(dst: *mut u8, src: *const u8, count: usize) {
    if count == 0 {
        return;
    }
    if dst.is_null() || src.is_null() {
        log::error!(
            "copy_bytes called with null pointer, src {:#x} dst {:#x}",
            src as usize,
            dst as usize
        );
        return;
    }
    // SAFETY: checked above; disjointness is the caller's contract.
    unsafe { ptr::copy_nonoverlapping(src, dst, count) };
}

/// Copy `count` bytes from `src` to `dst`, overlap permitted.
///
/// # Safety
///
/// When both pointers are non-null and `count` is nonzero, `src` must be
/// valid for reads and `dst` for writes of `count` bytes.
pub unsafe fn move_bytes(dst: *mut u8, src: *const u8, count: usize) {
    if count == 0 {
        return;
    }
    if dst.is_null() || src.is_null() {
        log::error!(
            "move_bytes called with null pointer, src {:#x} dst {:#x}",
            src as usize,
            dst as usize
        );
        return;
    }
    // SAFETY: checked above; validity is the caller's contract.
    unsafe { ptr::copy(src, dst, count) };
}

/// Byte-equality over two ranges. Zero length compares equal even for
/// null pointers; null with nonzero length fails with a diagnostic.
///
/// # Safety
///
/// When both pointers are non-null and `count` is nonzero, both must be
/// valid for reads of `count` bytes.
pub unsafe fn compare_bytes(a: *const u8, b: *const u8, count: usize) -> bool {
    if count == 0 {
        return true;
    }
    if a.is_null() || b.is_null() {
        log::error!(
            "compare_bytes called with null pointer, a {:#x} b {:#x}",
            a as usize,
            b as usize
        );
        return false;
    }
    // SAFETY: checked above; validity is the caller's contract.
    unsafe { slice::from_raw_parts(a, count) == slice::from_raw_parts(b, count) }
}

/// Lexicographic ordering of two byte ranges. The defined failure value
/// for a null pointer with nonzero length is [`Ordering::Equal`].
///
/// # Safety
///
/// Same contract as [`compare_bytes`].
pub unsafe fn compare_ordered(a: *const u8, b: *const u8, count: usize) -> Ordering {
    if count == 0 {
        return Ordering::Equal;
    }
    if a.is_null() || b.is_null() {
        log::error!(
            "compare_ordered called with null pointer, a {:#x} b {:#x}",
            a as usize,
            b as usize
        );
        return Ordering::Equal;
    }
    // SAFETY: checked above; validity is the caller's contract.
    unsafe { slice::from_raw_parts(a, count).cmp(slice::from_raw_parts(b, count)) }
}
