//! Raw mutex over a Win32 critical section.

use core::cell::UnsafeCell;

use windows_sys::Win32::System::Threading::{
    DeleteCriticalSection, EnterCriticalSection, InitializeCriticalSection,
    LeaveCriticalSection, TryEnterCriticalSection, CRITICAL_SECTION,
};

/// Exclusion primitive over `CRITICAL_SECTION`.
///
/// Critical sections are reentrant on this platform; the portable contract
/// remains non-recursive and callers must not rely on reentry.
#[repr(transparent)]
pub struct RawMutex {
    inner: UnsafeCell<CRITICAL_SECTION>,
}

// SAFETY: the critical section is the sharing point by definition.
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
        unsafe { InitializeCriticalSection(slot.cast()) };
        true
    }

    /// Blocks until the mutex is owned by the calling thread.
    ///
    /// # Safety
    /// `self` must have been initialized and not destroyed.
    pub unsafe fn lock(&self) -> bool {
        unsafe { EnterCriticalSection(self.inner.get()) };
        true
    }

    /// Acquires the mutex without blocking; `true` iff it is now owned.
    ///
    /// # Safety
    /// `self` must have been initialized and not destroyed.
    pub unsafe fn try_lock(&self) -> bool {
        unsafe { TryEnterCriticalSection(self.inner.get()) != 0 }
    }

    /// Releases the mutex.
    ///
    /// # Safety
    /// The calling thread must own the mutex.
    pub unsafe fn unlock(&self) -> bool {
        unsafe { LeaveCriticalSection(self.inner.get()) };
        true
    }

    /// Destroys the mutex at `slot`.
    ///
    /// # Safety
    /// `slot` must be initialized and unlocked; no further use is allowed.
    pub unsafe fn destroy(slot: *mut RawMutex) {
        unsafe { DeleteCriticalSection(slot.cast()) };
    }

    pub(crate) fn handle(&self) -> *mut CRITICAL_SECTION {
        self.inner.get()
    }
}
