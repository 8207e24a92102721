//! Raw condition variable over `CONDITION_VARIABLE`.

use core::cell::UnsafeCell;

use windows_sys::Win32::System::Threading::{
    InitializeConditionVariable, SleepConditionVariableCS, WakeAllConditionVariable,
    WakeConditionVariable, CONDITION_VARIABLE, INFINITE,
};

use super::mutex::RawMutex;

/// Condition variable; waiters must hold the associated [`RawMutex`].
#[repr(transparent)]
pub struct RawCond {
    inner: UnsafeCell<CONDITION_VARIABLE>,
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
        unsafe { InitializeConditionVariable(slot.cast()) };
        true
    }

    /// Atomically releases `mutex` and waits; reacquires before returning.
    ///
    /// # Safety
    /// The calling thread must own `mutex`; both objects must be initialized.
    pub unsafe fn wait(&self, mutex: &RawMutex) -> bool {
        if unsafe { SleepConditionVariableCS(self.inner.get(), mutex.handle(), INFINITE) } != 0 {
            true
        } else {
            log::error!("RawCond::wait: SleepConditionVariableCS() failed");
            false
        }
    }

    /// Wakes one waiter.
    ///
    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn signal(&self) -> bool {
        unsafe { WakeConditionVariable(self.inner.get()) };
        true
    }

    /// Wakes every waiter.
    ///
    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn broadcast(&self) -> bool {
        unsafe { WakeAllConditionVariable(self.inner.get()) };
        true
    }

    /// Condition variables hold no kernel resource of their own.
    ///
    /// # Safety
    /// No thread may be waiting; no further use is allowed.
    pub unsafe fn destroy(slot: *mut RawCond) {
        let _ = slot;
    }
}
