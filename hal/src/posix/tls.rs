//! Raw thread-local slots over pthread keys.
//!
//! POSIX keys carry native destructor callbacks, so the core's portable
//! destructor chain stays empty on this backend.

use core::ffi::c_void;

use crate::SlotDtor;

/// Native TLS destructors run at thread exit on this backend.
pub const HAS_NATIVE_DTORS: bool = true;

/// Slot id meaning "not yet allocated".
pub const SLOT_SENTINEL: usize = usize::MAX;

/// Allocates a platform slot, optionally with a native destructor.
///
/// # Safety
/// `dtor`, if provided, must be callable with any value later stored in the
/// slot, from any exiting thread.
pub unsafe fn slot_alloc(dtor: Option<SlotDtor>) -> Option<usize> {
    let mut key: libc::pthread_key_t = 0;
    if unsafe { libc::pthread_key_create(&mut key, dtor) } != 0 {
        log::error!("tls::slot_alloc: pthread_key_create() failed");
        return None;
    }
    let slot = key as usize;
    debug_assert_ne!(slot, SLOT_SENTINEL);
    Some(slot)
}

/// Releases a platform slot. Pending values are not destructed.
///
/// # Safety
/// `slot` must have come from [`slot_alloc`] and not been freed before.
pub unsafe fn slot_free(slot: usize) -> bool {
    if unsafe { libc::pthread_key_delete(slot as libc::pthread_key_t) } != 0 {
        log::error!("tls::slot_free: pthread_key_delete() failed");
        return false;
    }
    true
}

/// Reads the calling thread's value for `slot`; null when never set.
///
/// # Safety
/// `slot` must be a live slot id from [`slot_alloc`].
pub unsafe fn slot_get(slot: usize) -> *mut c_void {
    unsafe { libc::pthread_getspecific(slot as libc::pthread_key_t) }
}

/// Stores the calling thread's value for `slot`.
///
/// # Safety
/// `slot` must be a live slot id from [`slot_alloc`].
pub unsafe fn slot_set(slot: usize, value: *mut c_void) -> bool {
    if unsafe { libc::pthread_setspecific(slot as libc::pthread_key_t, value) } != 0 {
        log::error!("tls::slot_set: pthread_setspecific() failed");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trip() {
        unsafe {
            let slot = slot_alloc(None).expect("slot_alloc failed");
            assert!(slot_get(slot).is_null());
            assert!(slot_set(slot, 0x5A as *mut c_void));
            assert_eq!(slot_get(slot) as usize, 0x5A);
            assert!(slot_set(slot, core::ptr::null_mut()));
            assert!(slot_free(slot));
        }
    }
}
