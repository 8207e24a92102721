//! Read-write locks.
//!
//! One backend is selected at build time: the platform's native primitive by
//! default, or the composite mutex + condition-variable implementation in
//! [`general`] when the `emulated-rwlock` feature is set. The composite lock
//! is writer-preferring: a reader arriving while a writer is active or
//! queued waits, and a releasing writer resumes a queued writer ahead of
//! queued readers. Native backends keep whatever preference the host
//! implements.

use core::ptr::NonNull;

use crate::error::{Error, ErrorDomain, SysResult};
use crate::mem;

#[cfg(any(test, feature = "emulated-rwlock"))]
mod general;

cfg_if::cfg_if! {
    if #[cfg(feature = "emulated-rwlock")] {
        use general::GeneralRwLock as Inner;

        fn inner_new() -> SysResult<NonNull<Inner>> {
            let lock = Inner::new()?;
            mem::alloc_record(lock).ok_or_else(|| {
                log::error!("RwLock::new: failed to allocate rwlock record");
                Error::new(ErrorDomain::NoResources, 0, "failed to allocate rwlock record")
            })
        }

        unsafe fn inner_destroy(inner: NonNull<Inner>) {
            // SAFETY: forwarded caller contract.
            unsafe { mem::free_record(inner) };
        }

        fn op_read_lock(inner: &Inner) -> bool { inner.reader_lock() }
        fn op_read_trylock(inner: &Inner) -> bool { inner.reader_trylock() }
        fn op_read_unlock(inner: &Inner) -> bool { inner.reader_unlock() }
        fn op_write_lock(inner: &Inner) -> bool { inner.writer_lock() }
        fn op_write_trylock(inner: &Inner) -> bool { inner.writer_trylock() }
        fn op_write_unlock(inner: &Inner) -> bool { inner.writer_unlock() }
    } else {
        use strata_hal::imp::rwlock::RawRwLock as Inner;

        fn inner_new() -> SysResult<NonNull<Inner>> {
            let raw = mem::alloc_uninit::<Inner>().ok_or_else(|| {
                log::error!("RwLock::new: failed to allocate rwlock record");
                Error::new(ErrorDomain::NoResources, 0, "failed to allocate rwlock record")
            })?;
            // SAFETY: fresh pinned storage, released below on failure.
            if !unsafe { Inner::init(raw.as_ptr()) } {
                unsafe { mem::free_raw(raw) };
                return Err(Error::with_system(
                    ErrorDomain::Backend,
                    "failed to initialize rwlock",
                ));
            }
            Ok(raw)
        }

        unsafe fn inner_destroy(inner: NonNull<Inner>) {
            // SAFETY: forwarded caller contract.
            unsafe {
                Inner::destroy(inner.as_ptr());
                mem::free_raw(inner);
            }
        }

        // SAFETY of each op: the record is live for the wrapper's lifetime;
        // mode pairing is the caller's contract.
        fn op_read_lock(inner: &Inner) -> bool { unsafe { inner.read_lock() } }
        fn op_read_trylock(inner: &Inner) -> bool { unsafe { inner.try_read_lock() } }
        fn op_read_unlock(inner: &Inner) -> bool { unsafe { inner.read_unlock() } }
        fn op_write_lock(inner: &Inner) -> bool { unsafe { inner.write_lock() } }
        fn op_write_trylock(inner: &Inner) -> bool { unsafe { inner.try_write_lock() } }
        fn op_write_unlock(inner: &Inner) -> bool { unsafe { inner.write_unlock() } }
    }
}

/// Owning handle to a shared/exclusive lock.
///
/// While a writer is inside, no reader is; at most one writer is ever
/// active. Unlock calls must match the acquired mode: releasing a
/// reader-held lock through [`RwLock::writer_unlock`] (or vice versa) is a
/// caller bug that some backends detect and others corrupt state on.
/// Dropping a held lock is likewise a caller bug.
#[derive(Debug)]
pub struct RwLock {
    inner: NonNull<Inner>,
}

// SAFETY: the backend synchronizes all access.
unsafe impl Send for RwLock {}
unsafe impl Sync for RwLock {}

impl RwLock {
    /// Creates a read-write lock.
    pub fn new() -> SysResult<RwLock> {
        inner_new().map(|inner| RwLock { inner })
    }

    fn inner(&self) -> &Inner {
        // SAFETY: inner is live for the lifetime of self.
        unsafe { self.inner.as_ref() }
    }

    /// Acquires the lock for shared reading, waiting while a writer is
    /// active (or, on the composite backend, queued).
    pub fn reader_lock(&self) -> bool {
        op_read_lock(self.inner())
    }

    /// Shared acquisition without blocking; `true` iff acquired.
    pub fn reader_trylock(&self) -> bool {
        op_read_trylock(self.inner())
    }

    /// Releases one shared hold.
    pub fn reader_unlock(&self) -> bool {
        op_read_unlock(self.inner())
    }

    /// Acquires the lock exclusively, waiting for active readers and
    /// writers to drain.
    pub fn writer_lock(&self) -> bool {
        op_write_lock(self.inner())
    }

    /// Exclusive acquisition without blocking; `true` iff acquired.
    pub fn writer_trylock(&self) -> bool {
        op_write_trylock(self.inner())
    }

    /// Releases the exclusive hold.
    pub fn writer_unlock(&self) -> bool {
        op_write_unlock(self.inner())
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        // SAFETY: exclusive access at drop; the caller has released all holds.
        unsafe { inner_destroy(self.inner) };
    }
}

pub(crate) fn init() {
    #[cfg(all(windows, not(feature = "emulated-rwlock")))]
    strata_hal::imp::rwlock::init_engine();
}

pub(crate) fn shutdown() {
    #[cfg(all(windows, not(feature = "emulated-rwlock")))]
    strata_hal::imp::rwlock::shutdown_engine();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::sync::Arc;

    #[test]
    fn multiple_readers_coexist() {
        test_support::init();
        let lock = RwLock::new().expect("rwlock creation failed");
        assert!(lock.reader_lock());
        assert!(lock.reader_trylock());
        assert!(lock.reader_unlock());
        assert!(lock.reader_unlock());
    }

    #[test]
    fn writer_excludes_readers() {
        test_support::init();
        let lock = Arc::new(RwLock::new().expect("rwlock creation failed"));
        assert!(lock.writer_lock());

        let contender = Arc::clone(&lock);
        let (read_ok, write_ok) = std::thread::spawn(move || {
            (contender.reader_trylock(), contender.writer_trylock())
        })
        .join()
        .unwrap();
        assert!(!read_ok);
        assert!(!write_ok);

        assert!(lock.writer_unlock());
        assert!(lock.writer_trylock());
        assert!(lock.writer_unlock());
    }

    #[test]
    fn writer_trylock_fails_under_readers() {
        test_support::init();
        let lock = Arc::new(RwLock::new().expect("rwlock creation failed"));
        assert!(lock.reader_lock());

        let contender = Arc::clone(&lock);
        let write_ok = std::thread::spawn(move || contender.writer_trylock())
            .join()
            .unwrap();
        assert!(!write_ok);

        assert!(lock.reader_unlock());
    }

    #[test]
    fn idle_lock_accepts_writer_immediately() {
        test_support::init();
        let lock = RwLock::new().expect("rwlock creation failed");
        assert!(lock.writer_trylock());
        assert!(lock.writer_unlock());
    }

    #[test]
    fn readers_and_writer_never_overlap() {
        test_support::init();

        use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        struct Shared {
            lock: RwLock,
            writer_inside: AtomicBool,
            violations: AtomicUsize,
        }

        let shared = Arc::new(Shared {
            lock: RwLock::new().expect("rwlock creation failed"),
            writer_inside: AtomicBool::new(false),
            violations: AtomicUsize::new(0),
        });

        const ITERS: usize = 2_000;

        let writer = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                for _ in 0..ITERS {
                    assert!(shared.lock.writer_lock());
                    shared.writer_inside.store(true, Ordering::SeqCst);
                    shared.writer_inside.store(false, Ordering::SeqCst);
                    assert!(shared.lock.writer_unlock());
                }
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..ITERS {
                        assert!(shared.lock.reader_lock());
                        if shared.writer_inside.load(Ordering::SeqCst) {
                            shared.violations.fetch_add(1, Ordering::SeqCst);
                        }
                        assert!(shared.lock.reader_unlock());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(shared.violations.load(Ordering::SeqCst), 0);
    }
}
