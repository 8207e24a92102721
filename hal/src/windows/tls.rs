//! Raw thread-local slots over `TlsAlloc` indices.
//!
//! Win32 TLS carries no destructor callbacks; the core's portable destructor
//! chain provides the cleanup for library-created threads on this backend.

use core::ffi::c_void;

use windows_sys::Win32::System::Threading::{
    TlsAlloc, TlsFree, TlsGetValue, TlsSetValue, TLS_OUT_OF_INDEXES,
};

use crate::SlotDtor;

/// This backend has no native TLS destructors.
pub const HAS_NATIVE_DTORS: bool = false;

/// Slot id meaning "not yet allocated".
pub const SLOT_SENTINEL: usize = usize::MAX;

/// Allocates a platform slot; the destructor, if any, is the caller's to
/// dispatch through the portable chain.
///
/// # Safety
/// None beyond the slot-id discipline of the sibling functions.
pub unsafe fn slot_alloc(dtor: Option<SlotDtor>) -> Option<usize> {
    let _ = dtor;
    let idx = unsafe { TlsAlloc() };
    if idx == TLS_OUT_OF_INDEXES {
        log::error!("tls::slot_alloc: TlsAlloc() failed");
        return None;
    }
    Some(idx as usize)
}

/// Releases a platform slot. Pending values are not destructed.
///
/// # Safety
/// `slot` must have come from [`slot_alloc`] and not been freed before.
pub unsafe fn slot_free(slot: usize) -> bool {
    if unsafe { TlsFree(slot as u32) } == 0 {
        log::error!("tls::slot_free: TlsFree() failed");
        return false;
    }
    true
}

/// Reads the calling thread's value for `slot`; null when never set.
///
/// # Safety
/// `slot` must be a live slot id from [`slot_alloc`].
pub unsafe fn slot_get(slot: usize) -> *mut c_void {
    unsafe { TlsGetValue(slot as u32) }
}

/// Stores the calling thread's value for `slot`.
///
/// # Safety
/// `slot` must be a live slot id from [`slot_alloc`].
pub unsafe fn slot_set(slot: usize, value: *mut c_void) -> bool {
    if unsafe { TlsSetValue(slot as u32, value) } == 0 {
        log::error!("tls::slot_set: TlsSetValue() failed");
        return false;
    }
    true
}
