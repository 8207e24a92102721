//! Raw read-write lock over `pthread_rwlock_t`.

use core::cell::UnsafeCell;
use core::ptr;

/// Native shared/exclusive lock.
///
/// Reader/writer preference is whatever the host pthreads implementation
/// chooses; the portable composite lock is used where the core needs the
/// documented writer-preference behavior on every platform.
#[repr(transparent)]
pub struct RawRwLock {
    inner: UnsafeCell<libc::pthread_rwlock_t>,
}

// SAFETY: the pthread rwlock is the sharing point by definition.
unsafe impl Send for RawRwLock {}
unsafe impl Sync for RawRwLock {}

impl core::fmt::Debug for RawRwLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawRwLock").finish_non_exhaustive()
    }
}

impl RawRwLock {
    /// Initializes a rwlock at `slot`.
    ///
    /// # Safety
    /// `slot` must be valid for writes and stay pinned until [`Self::destroy`].
    pub unsafe fn init(slot: *mut RawRwLock) -> bool {
        if unsafe { libc::pthread_rwlock_init(slot.cast(), ptr::null()) } != 0 {
            log::error!("RawRwLock::init: pthread_rwlock_init() failed");
            return false;
        }
        true
    }

    /// # Safety
    /// `self` must be initialized; the caller must not already hold the lock
    /// for writing.
    pub unsafe fn read_lock(&self) -> bool {
        if unsafe { libc::pthread_rwlock_rdlock(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawRwLock::read_lock: pthread_rwlock_rdlock() failed");
            false
        }
    }

    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn try_read_lock(&self) -> bool {
        unsafe { libc::pthread_rwlock_tryrdlock(self.inner.get()) == 0 }
    }

    /// # Safety
    /// The calling thread must hold a read lock.
    pub unsafe fn read_unlock(&self) -> bool {
        if unsafe { libc::pthread_rwlock_unlock(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawRwLock::read_unlock: pthread_rwlock_unlock() failed");
            false
        }
    }

    /// # Safety
    /// `self` must be initialized; the caller must not already hold the lock.
    pub unsafe fn write_lock(&self) -> bool {
        if unsafe { libc::pthread_rwlock_wrlock(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawRwLock::write_lock: pthread_rwlock_wrlock() failed");
            false
        }
    }

    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn try_write_lock(&self) -> bool {
        unsafe { libc::pthread_rwlock_trywrlock(self.inner.get()) == 0 }
    }

    /// # Safety
    /// The calling thread must hold the write lock.
    pub unsafe fn write_unlock(&self) -> bool {
        if unsafe { libc::pthread_rwlock_unlock(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawRwLock::write_unlock: pthread_rwlock_unlock() failed");
            false
        }
    }

    /// Destroys the rwlock at `slot`.
    ///
    /// # Safety
    /// The lock must be unheld; no further use is allowed.
    pub unsafe fn destroy(slot: *mut RawRwLock) {
        if unsafe { libc::pthread_rwlock_destroy(slot.cast()) } != 0 {
            log::error!("RawRwLock::destroy: pthread_rwlock_destroy() failed");
        }
    }
}
