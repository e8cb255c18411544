use std::os::raw::c_void;
use std::ptr;
use std::slice;

use lmdb_sys as ffi;

/// Builds an `MDB_val` pointing at caller-owned bytes.
///
/// The engine only reads through the pointer for the duration of the call it
/// is passed to, so the cast away from `const` is never written through.
pub(crate) fn to_val(data: &[u8]) -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: data.len(),
        mv_data: data.as_ptr() as *mut c_void,
    }
}

/// An empty `MDB_val` for the engine to fill in
pub(crate) fn empty_val() -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: 0,
        mv_data: ptr::null_mut(),
    }
}

/// Views engine-owned memory as a byte slice.
///
/// # Safety
///
/// `val` must have been filled in by the engine and the returned slice must
/// not outlive the transaction (or the next write) that produced it.
pub(crate) unsafe fn from_val<'a>(val: &ffi::MDB_val) -> &'a [u8] {
    if val.mv_size == 0 || val.mv_data.is_null() {
        &[]
    } else {
        slice::from_raw_parts(val.mv_data as *const u8, val.mv_size)
    }
}
