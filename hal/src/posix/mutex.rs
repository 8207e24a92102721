//! Raw mutex over `pthread_mutex_t`.

use core::cell::UnsafeCell;
use core::ptr;

/// Non-recursive exclusion primitive.
///
/// The wrapper is address-sensitive: it must be initialized in place with
/// [`RawMutex::init`] and never moved afterwards. Lock/unlock pairing is the
/// caller's responsibility; unlocking from a non-owning thread is undefined.
///
/// `repr(transparent)` over the platform handle, so a `*mut RawMutex` casts
/// directly to the pthread object.
#[repr(transparent)]
pub struct RawMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: the pthread mutex is the sharing point by definition.
unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl core::fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawMutex").finish_non_exhaustive()
    }
}

impl RawMutex {
    /// Initializes a mutex at `slot`.
    ///
    /// # Safety
    /// `slot` must be valid for writes and stay pinned until [`Self::destroy`].
    pub unsafe fn init(slot: *mut RawMutex) -> bool {
        if unsafe { libc::pthread_mutex_init(slot.cast(), ptr::null()) } != 0 {
            log::error!("RawMutex::init: pthread_mutex_init() failed");
            return false;
        }
        true
    }

    /// Blocks until the mutex is owned by the calling thread.
    ///
    /// # Safety
    /// `self` must have been initialized and not destroyed.
    pub unsafe fn lock(&self) -> bool {
        if unsafe { libc::pthread_mutex_lock(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawMutex::lock: pthread_mutex_lock() failed");
            false
        }
    }

    /// Acquires the mutex without blocking; `true` iff it is now owned.
    ///
    /// # Safety
    /// `self` must have been initialized and not destroyed.
    pub unsafe fn try_lock(&self) -> bool {
        unsafe { libc::pthread_mutex_trylock(self.inner.get()) == 0 }
    }

    /// Releases the mutex.
    ///
    /// # Safety
    /// The calling thread must own the mutex.
    pub unsafe fn unlock(&self) -> bool {
        if unsafe { libc::pthread_mutex_unlock(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawMutex::unlock: pthread_mutex_unlock() failed");
            false
        }
    }

    /// Destroys the mutex at `slot`.
    ///
    /// # Safety
    /// `slot` must be initialized and unlocked; no further use is allowed.
    pub unsafe fn destroy(slot: *mut RawMutex) {
        if unsafe { libc::pthread_mutex_destroy(slot.cast()) } != 0 {
            log::error!("RawMutex::destroy: pthread_mutex_destroy() failed");
        }
    }

    pub(crate) fn handle(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;

    #[test]
    fn lock_cycle() {
        let mut slot = MaybeUninit::<RawMutex>::uninit();
        unsafe {
            assert!(RawMutex::init(slot.as_mut_ptr()));
            let m = slot.assume_init_ref();
            assert!(m.lock());
            assert!(m.unlock());
            assert!(m.try_lock());
            assert!(m.unlock());
            RawMutex::destroy(slot.as_mut_ptr());
        }
    }
}
