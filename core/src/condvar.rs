//! Condition variables.

use core::ptr::NonNull;

use strata_hal::imp::cond::RawCond;

use crate::error::{Error, ErrorDomain, SysResult};
use crate::mem;
use crate::mutex::Mutex;

/// Owning handle to a kernel condition variable.
///
/// Waiters must hold the associated [`Mutex`]; wakeups may be spurious, so
/// callers re-check their predicate in a loop.
#[derive(Debug)]
pub struct Condvar {
    raw: NonNull<RawCond>,
}

// SAFETY: the underlying kernel object synchronizes all access.
unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    /// Creates a condition variable.
    pub fn new() -> SysResult<Condvar> {
        let raw = mem::alloc_uninit::<RawCond>().ok_or_else(|| {
            log::error!("Condvar::new: failed to allocate condvar record");
            Error::new(
                ErrorDomain::NoResources,
                0,
                "failed to allocate condvar record",
            )
        })?;

        // SAFETY: fresh pinned storage, released below on failure.
        if !unsafe { RawCond::init(raw.as_ptr()) } {
            unsafe { mem::free_raw(raw) };
            return Err(Error::with_system(
                ErrorDomain::Backend,
                "failed to initialize condition variable",
            ));
        }

        Ok(Condvar { raw })
    }

    /// Atomically releases `mutex` and blocks; reacquires before returning.
    ///
    /// The calling thread must own `mutex`.
    pub fn wait(&self, mutex: &Mutex) -> bool {
        // SAFETY: both objects are live; ownership is the caller's contract.
        unsafe { self.raw.as_ref().wait(mutex.raw()) }
    }

    /// Wakes one waiter, if any.
    pub fn signal(&self) -> bool {
        // SAFETY: raw is live for the lifetime of self.
        unsafe { self.raw.as_ref().signal() }
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) -> bool {
        // SAFETY: raw is live for the lifetime of self.
        unsafe { self.raw.as_ref().broadcast() }
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        // SAFETY: exclusive access at drop; no waiter may remain.
        unsafe {
            RawCond::destroy(self.raw.as_ptr());
            mem::free_raw(self.raw);
        }
    }
}
