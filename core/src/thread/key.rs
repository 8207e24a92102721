//! Thread-local keys.
//!
//! A key is a process-wide identifier resolving to a per-thread value. The
//! platform slot behind a key is allocated lazily: the first access takes
//! the process-wide TLS mutex, allocates the slot, links a destructor-chain
//! node when needed, and publishes the slot id into the key with a
//! release-ordered write. Later accesses read it with acquire ordering and
//! skip the mutex entirely.

use core::ffi::c_void;
use core::ptr::NonNull;

use strata_hal::imp::mutex::RawMutex;
use strata_hal::imp::tls;
use strata_hal::SlotDtor;

use crate::atomic::AtomicUint;
use crate::error::{Error, ErrorDomain, SysResult};
use crate::mem;

use super::dtors;

pub(crate) struct KeyInner {
    /// Platform slot id; [`tls::SLOT_SENTINEL`] until materialized.
    slot: AtomicUint,
    dtor: Option<SlotDtor>,
}

/// Copyable handle to a thread-local key.
///
/// The key is shared across threads; every thread resolves it to its own
/// value. Copies alias one key record: after [`Key::free`], all of them are
/// dangling and must not be used.
#[derive(Debug, Clone, Copy)]
pub struct Key {
    inner: NonNull<KeyInner>,
}

// SAFETY: the inner record is immutable apart from the atomic slot word.
unsafe impl Send for Key {}
unsafe impl Sync for Key {}

// ============================================================================
// Process-wide TLS-materialization mutex
// ============================================================================

struct MutexSlot(core::cell::UnsafeCell<Option<NonNull<RawMutex>>>);

// SAFETY: written only inside the single-threaded lifecycle windows.
unsafe impl Sync for MutexSlot {}

static TLS_MUTEX: MutexSlot = MutexSlot(core::cell::UnsafeCell::new(None));

fn tls_mutex() -> Option<NonNull<RawMutex>> {
    // SAFETY: concurrent readers only; writes are confined to init/shutdown.
    unsafe { *TLS_MUTEX.0.get() }
}

pub(crate) fn init() {
    // SAFETY: single-threaded init window.
    if unsafe { (*TLS_MUTEX.0.get()).is_some() } {
        return;
    }
    let slot = match mem::alloc_uninit::<RawMutex>() {
        Some(slot) => slot,
        None => panic!("failed to allocate the TLS materialization mutex"),
    };
    // SAFETY: fresh pinned storage.
    if !unsafe { RawMutex::init(slot.as_ptr()) } {
        // SAFETY: init failed, storage is still raw.
        unsafe { mem::free_raw(slot) };
        panic!("failed to initialize the TLS materialization mutex");
    }
    // SAFETY: single-threaded init window.
    unsafe { *TLS_MUTEX.0.get() = Some(slot) };
}

pub(crate) fn shutdown() {
    // SAFETY: single-threaded teardown window.
    if let Some(mutex) = unsafe { (*TLS_MUTEX.0.get()).take() } {
        // SAFETY: no materialization may race with shutdown by contract.
        unsafe {
            RawMutex::destroy(mutex.as_ptr());
            mem::free_raw(mutex);
        }
    }
}

// ============================================================================
// Key operations
// ============================================================================

impl Key {
    /// Creates a key, optionally with a destructor for non-null values.
    ///
    /// The platform slot is not allocated yet; the first access on any
    /// thread materializes it.
    pub fn new(dtor: Option<SlotDtor>) -> SysResult<Key> {
        let inner = mem::alloc_record(KeyInner {
            slot: AtomicUint::new(tls::SLOT_SENTINEL),
            dtor,
        })
        .ok_or_else(|| {
            log::error!("Key::new: failed to allocate key record");
            Error::new(ErrorDomain::NoResources, 0, "failed to allocate key record")
        })?;
        Ok(Key { inner })
    }

    /// Detaches the key record.
    ///
    /// The platform slot, once materialized, stays allocated: slots are
    /// rarely reclaimable, and a destructor-chain node may still reference
    /// it until shutdown. All copies of the key become invalid.
    pub fn free(self) {
        // SAFETY: the caller asserts no copy of the key is used afterwards.
        unsafe { mem::free_record(self.inner) };
    }

    fn inner(&self) -> &KeyInner {
        // SAFETY: inner is live until Key::free per the caller contract.
        unsafe { self.inner.as_ref() }
    }

    /// Resolves the platform slot, allocating it on first use.
    fn materialize(&self) -> Option<usize> {
        let inner = self.inner();

        let slot = inner.slot.get();
        if slot != tls::SLOT_SENTINEL {
            return Some(slot);
        }

        let Some(mutex) = tls_mutex() else {
            log::error!("Key: used outside the initialized lifecycle");
            return None;
        };

        // SAFETY: the mutex is live between init and shutdown.
        if !unsafe { mutex.as_ref().lock() } {
            return None;
        }

        let slot = self.materialize_locked(inner);

        // SAFETY: locked above.
        unsafe { mutex.as_ref().unlock() };
        slot
    }

    fn materialize_locked(&self, inner: &KeyInner) -> Option<usize> {
        // Another thread may have won the race before we took the mutex.
        let published = inner.slot.get();
        if published != tls::SLOT_SENTINEL {
            return Some(published);
        }

        let native_dtor = if tls::HAS_NATIVE_DTORS {
            inner.dtor
        } else {
            None
        };
        // SAFETY: dtor validity is the key creator's contract.
        let slot = unsafe { tls::slot_alloc(native_dtor) }?;

        if !tls::HAS_NATIVE_DTORS {
            if let Some(dtor) = inner.dtor {
                if !dtors::push(slot, dtor) {
                    // SAFETY: the slot was never published.
                    unsafe { tls::slot_free(slot) };
                    return None;
                }
            }
        }

        inner.slot.set(slot);
        Some(slot)
    }

    /// The calling thread's value for this key; null when never set.
    pub fn get(&self) -> *mut c_void {
        match self.materialize() {
            // SAFETY: slot is live.
            Some(slot) => unsafe { tls::slot_get(slot) },
            None => core::ptr::null_mut(),
        }
    }

    /// Stores the calling thread's value for this key.
    ///
    /// The previous value is overwritten without invoking the destructor;
    /// use [`Key::replace`] for destructing replacement.
    pub fn set(&self, value: *mut c_void) -> bool {
        match self.materialize() {
            // SAFETY: slot is live.
            Some(slot) => unsafe { tls::slot_set(slot, value) },
            None => false,
        }
    }

    /// Stores the calling thread's value, invoking the destructor on the
    /// previous value if one is registered and the value is non-null.
    pub fn replace(&self, value: *mut c_void) -> bool {
        let Some(slot) = self.materialize() else {
            return false;
        };
        // SAFETY: slot is live.
        let old = unsafe { tls::slot_get(slot) };
        if !old.is_null() {
            if let Some(dtor) = self.inner().dtor {
                // SAFETY: the dtor contract is the key creator's.
                unsafe { dtor(old) };
            }
        }
        // SAFETY: slot is live.
        unsafe { tls::slot_set(slot, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_then_get_same_thread() {
        test_support::init();
        let key = Key::new(None).expect("key creation failed");
        assert!(key.get().is_null());
        assert!(key.set(0xBEEF as *mut c_void));
        assert_eq!(key.get() as usize, 0xBEEF);
        key.free();
    }

    #[test]
    fn values_are_per_thread() {
        test_support::init();
        let key = Key::new(None).expect("key creation failed");
        assert!(key.set(0x1 as *mut c_void));

        let other = std::thread::spawn(move || key.get() as usize)
            .join()
            .unwrap();
        assert_eq!(other, 0);
        assert_eq!(key.get() as usize, 0x1);
        key.free();
    }

    static REPLACED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_replace(_value: *mut c_void) {
        REPLACED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn replace_invokes_dtor_set_does_not() {
        test_support::init();
        let key = Key::new(Some(count_replace)).expect("key creation failed");

        assert!(key.set(0x10 as *mut c_void));
        let before = REPLACED.load(Ordering::SeqCst);
        assert!(key.set(0x20 as *mut c_void));
        assert_eq!(REPLACED.load(Ordering::SeqCst), before);

        assert!(key.replace(0x30 as *mut c_void));
        assert_eq!(REPLACED.load(Ordering::SeqCst), before + 1);

        // Clear so thread-exit destructors stay out of the count.
        assert!(key.set(core::ptr::null_mut()));
        key.free();
    }

    #[test]
    fn replace_on_null_skips_dtor() {
        test_support::init();
        let key = Key::new(Some(count_replace)).expect("key creation failed");
        let before = REPLACED.load(Ordering::SeqCst);
        assert!(key.replace(0x40 as *mut c_void));
        assert_eq!(REPLACED.load(Ordering::SeqCst), before);
        assert!(key.set(core::ptr::null_mut()));
        key.free();
    }
}
