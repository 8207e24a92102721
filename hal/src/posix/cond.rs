//! Raw condition variable over `pthread_cond_t`.

use core::cell::UnsafeCell;
use core::ptr;

use super::mutex::RawMutex;

/// Condition variable; waiters must hold the associated [`RawMutex`].
#[repr(transparent)]
pub struct RawCond {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: sharing is the point; the kernel object synchronizes access.
unsafe impl Send for RawCond {}
unsafe impl Sync for RawCond {}

impl core::fmt::Debug for RawCond {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawCond").finish_non_exhaustive()
    }
}

impl RawCond {
    /// Initializes a condition variable at `slot`.
    ///
    /// # Safety
    /// `slot` must be valid for writes and stay pinned until [`Self::destroy`].
    pub unsafe fn init(slot: *mut RawCond) -> bool {
        if unsafe { libc::pthread_cond_init(slot.cast(), ptr::null()) } != 0 {
            log::error!("RawCond::init: pthread_cond_init() failed");
            return false;
        }
        true
    }

    /// Atomically releases `mutex` and waits; reacquires before returning.
    ///
    /// Spurious wakeups are possible; callers loop on their predicate.
    ///
    /// # Safety
    /// The calling thread must own `mutex`; both objects must be initialized.
    pub unsafe fn wait(&self, mutex: &RawMutex) -> bool {
        if unsafe { libc::pthread_cond_wait(self.inner.get(), mutex.handle()) } == 0 {
            true
        } else {
            log::error!("RawCond::wait: pthread_cond_wait() failed");
            false
        }
    }

    /// Wakes one waiter.
    ///
    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn signal(&self) -> bool {
        if unsafe { libc::pthread_cond_signal(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawCond::signal: pthread_cond_signal() failed");
            false
        }
    }

    /// Wakes every waiter.
    ///
    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn broadcast(&self) -> bool {
        if unsafe { libc::pthread_cond_broadcast(self.inner.get()) } == 0 {
            true
        } else {
            log::error!("RawCond::broadcast: pthread_cond_broadcast() failed");
            false
        }
    }

    /// Destroys the condition variable at `slot`.
    ///
    /// # Safety
    /// No thread may be waiting; no further use is allowed.
    pub unsafe fn destroy(slot: *mut RawCond) {
        if unsafe { libc::pthread_cond_destroy(slot.cast()) } != 0 {
            log::error!("RawCond::destroy: pthread_cond_destroy() failed");
        }
    }
}
