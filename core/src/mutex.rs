//! Mutual exclusion.

use core::ptr::NonNull;

use strata_hal::imp::mutex::RawMutex;

use crate::error::{Error, ErrorDomain, SysResult};
use crate::mem;

/// Owning handle to a kernel exclusion object.
///
/// Non-recursive by contract: relocking from the owning thread may deadlock
/// depending on the backend. Unlocking from a thread that does not own the
/// mutex is undefined. Dropping a locked mutex is a caller bug; unlock first.
#[derive(Debug)]
pub struct Mutex {
    raw: NonNull<RawMutex>,
}

// SAFETY: the underlying kernel object synchronizes all access.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Creates a mutex. Fails on allocation failure or backend refusal.
    pub fn new() -> SysResult<Mutex> {
        let raw = mem::alloc_uninit::<RawMutex>().ok_or_else(|| {
            log::error!("Mutex::new: failed to allocate mutex record");
            Error::new(ErrorDomain::NoResources, 0, "failed to allocate mutex record")
        })?;

        // SAFETY: fresh pinned storage, released below on failure.
        if !unsafe { RawMutex::init(raw.as_ptr()) } {
            unsafe { mem::free_raw(raw) };
            return Err(Error::with_system(
                ErrorDomain::Backend,
                "failed to initialize mutex",
            ));
        }

        Ok(Mutex { raw })
    }

    /// Blocks until the mutex is owned by the calling thread.
    ///
    /// Transient interruptions are retried by the backend; `false` means the
    /// backend reported a real failure.
    pub fn lock(&self) -> bool {
        // SAFETY: raw is live for the lifetime of self.
        unsafe { self.raw.as_ref().lock() }
    }

    /// Acquires the mutex without blocking; `true` iff it is now owned.
    pub fn try_lock(&self) -> bool {
        // SAFETY: raw is live for the lifetime of self.
        unsafe { self.raw.as_ref().try_lock() }
    }

    /// Releases the mutex. The calling thread must own it.
    pub fn unlock(&self) -> bool {
        // SAFETY: raw is live for the lifetime of self.
        unsafe { self.raw.as_ref().unlock() }
    }

    pub(crate) fn raw(&self) -> &RawMutex {
        // SAFETY: raw is live for the lifetime of self.
        unsafe { self.raw.as_ref() }
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        // SAFETY: exclusive access at drop; the caller has unlocked.
        unsafe {
            RawMutex::destroy(self.raw.as_ptr());
            mem::free_raw(self.raw);
        }
    }
}
