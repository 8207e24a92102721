//! Memory management vtable.
//!
//! Every core record (locks, thread records, keys, chain nodes) is allocated
//! through a process-wide vtable of `alloc`/`realloc`/`free` hooks. By
//! default the hooks map to the system allocator; [`set_vtable`] installs a
//! custom allocator, at most once per init cycle, before any other subsystem
//! allocates. The vtable is read without locking: installation is restricted
//! to the single-threaded initialization window by contract.

use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

/// Memory management hooks.
///
/// All three must be supplied together. `realloc` with a null pointer
/// behaves like `alloc`; `free` with a null pointer is a no-op. Blocks
/// returned by `alloc`/`realloc` must be at least pointer-aligned to the
/// platform's largest fundamental alignment, as the system allocator is.
#[derive(Debug, Clone, Copy)]
pub struct MemVTable {
    /// Allocates `size` bytes; null on failure.
    pub alloc: fn(size: usize) -> *mut c_void,
    /// Resizes `ptr` to `size` bytes; null on failure (original stays valid).
    pub realloc: fn(ptr: *mut c_void, size: usize) -> *mut c_void,
    /// Releases a block obtained from `alloc` or `realloc`.
    pub free: fn(ptr: *mut c_void),
}

fn sys_alloc(size: usize) -> *mut c_void {
    // SAFETY: malloc has no preconditions.
    unsafe { libc::malloc(size) }
}

fn sys_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: ptr is null or a live malloc block per the vtable contract.
    unsafe { libc::realloc(ptr, size) }
}

fn sys_free(ptr: *mut c_void) {
    // SAFETY: ptr is null or a live malloc block per the vtable contract.
    unsafe { libc::free(ptr) }
}

const SYSTEM_VTABLE: MemVTable = MemVTable {
    alloc: sys_alloc,
    realloc: sys_realloc,
    free: sys_free,
};

struct VTableSlot(UnsafeCell<MemVTable>);

// SAFETY: mutated only inside the single-threaded init/teardown windows.
unsafe impl Sync for VTableSlot {}

static VTABLE: VTableSlot = VTableSlot(UnsafeCell::new(SYSTEM_VTABLE));
static REPLACED: AtomicBool = AtomicBool::new(false);

fn vtable() -> MemVTable {
    // SAFETY: reads race only with the init-window writes forbidden by the
    // lifecycle contract.
    unsafe { *VTABLE.0.get() }
}

/// Installs a custom allocator vtable.
///
/// Allowed at most once per init cycle, before concurrent use begins;
/// returns `false` (with a diagnostic) for a second attempt.
pub fn set_vtable(vt: &MemVTable) -> bool {
    if REPLACED.swap(true, Ordering::SeqCst) {
        log::warn!("mem::set_vtable: vtable already replaced in this init cycle");
        return false;
    }
    // SAFETY: single-threaded init window per the lifecycle contract.
    unsafe { *VTABLE.0.get() = *vt };
    true
}

/// Allocates `size` bytes through the vtable; null on failure or `size == 0`.
pub fn alloc(size: usize) -> *mut c_void {
    if size == 0 {
        return core::ptr::null_mut();
    }
    (vtable().alloc)(size)
}

/// Resizes `ptr` through the vtable. A null `ptr` behaves like [`alloc`].
pub fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if size == 0 {
        return core::ptr::null_mut();
    }
    (vtable().realloc)(ptr, size)
}

/// Releases a block through the vtable. A null `ptr` is a no-op.
pub fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    (vtable().free)(ptr)
}

/// Allocates uninitialized storage for one `T`.
pub(crate) fn alloc_uninit<T>() -> Option<NonNull<T>> {
    // The vtable contract guarantees fundamental alignment only.
    debug_assert!(align_of::<T>() <= 16);
    NonNull::new(alloc(size_of::<T>()) as *mut T)
}

/// Allocates storage for `value` and moves it in.
pub(crate) fn alloc_record<T>(value: T) -> Option<NonNull<T>> {
    let slot = alloc_uninit::<T>()?;
    // SAFETY: slot is fresh, writable storage of the right size.
    unsafe { slot.as_ptr().write(value) };
    Some(slot)
}

/// Drops the record and releases its storage.
///
/// # Safety
/// `ptr` must come from [`alloc_record`] (or be an initialized
/// [`alloc_uninit`] block) and must not be used afterwards.
pub(crate) unsafe fn free_record<T>(ptr: NonNull<T>) {
    unsafe {
        core::ptr::drop_in_place(ptr.as_ptr());
        free(ptr.as_ptr() as *mut c_void);
    }
}

/// Releases storage without dropping its contents.
///
/// # Safety
/// `ptr` must come from [`alloc_uninit`]/[`alloc_record`] and must not be
/// used afterwards. Any contents requiring drop must already be torn down.
pub(crate) unsafe fn free_raw<T>(ptr: NonNull<T>) {
    unsafe { free(ptr.as_ptr() as *mut c_void) };
}

/// Restores the system allocator and re-arms [`set_vtable`].
pub(crate) fn init(vt: Option<&MemVTable>) {
    REPLACED.store(false, Ordering::SeqCst);
    // SAFETY: single-threaded init window per the lifecycle contract.
    unsafe { *VTABLE.0.get() = SYSTEM_VTABLE };
    if let Some(vt) = vt {
        set_vtable(vt);
    }
}

pub(crate) fn shutdown() {
    // SAFETY: single-threaded teardown window per the lifecycle contract.
    unsafe { *VTABLE.0.get() = SYSTEM_VTABLE };
    REPLACED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_round_trip() {
        let block = alloc(64);
        assert!(!block.is_null());
        free(block);
    }

    #[test]
    fn zero_size_is_null() {
        assert!(alloc(0).is_null());
        assert!(realloc(core::ptr::null_mut(), 0).is_null());
    }

    #[test]
    fn free_null_is_noop() {
        free(core::ptr::null_mut());
    }

    #[test]
    fn record_round_trip() {
        let rec = alloc_record([7u64; 4]).expect("allocation failed");
        // SAFETY: fresh record from alloc_record.
        unsafe {
            assert_eq!(rec.as_ref()[2], 7);
            free_record(rec);
        }
    }

    #[test]
    fn realloc_grows() {
        let block = alloc(16);
        assert!(!block.is_null());
        let grown = realloc(block, 256);
        assert!(!grown.is_null());
        free(grown);
    }
}
