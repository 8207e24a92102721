//! Atomic operations on word-sized cells.
//!
//! Three cell types cover the portable surface: [`AtomicInt`] (signed word),
//! [`AtomicUint`] (unsigned word) and [`AtomicPtrCell`] (pointer word). Every
//! operation is a full bidirectional fence with respect to the caller: a get
//! keeps later accesses after it, a set keeps earlier accesses before it, and
//! read-modify-writes are both. From the user's point of view this is
//! sequential consistency.
//!
//! Two backends exist, chosen at build time. The native backend maps each
//! operation onto the hardware's sequentially consistent atomics. The
//! `emulated-atomics` backend serializes every operation - on every cell -
//! through one process-wide mutex, which the lifecycle creates before any
//! other subsystem runs; using an emulated cell before [`lifecycle::init`]
//! (or after shutdown) is a contract violation and panics.
//!
//! [`lifecycle::init`]: crate::lifecycle::init

use core::ffi::c_void;

// Cells are raw machine words.
static_assertions::assert_eq_size!(usize, *mut c_void);
static_assertions::assert_eq_size!(isize, usize);

cfg_if::cfg_if! {
    if #[cfg(feature = "emulated-atomics")] {
        use emulated as imp;
    } else {
        use native as imp;
    }
}

/// Signed word-sized atomic cell.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicInt {
    imp: imp::Int,
}

impl AtomicInt {
    /// Creates a cell holding `value`.
    pub const fn new(value: isize) -> AtomicInt {
        AtomicInt {
            imp: imp::Int::new(value),
        }
    }

    /// Reads the cell.
    pub fn get(&self) -> isize {
        self.imp.get()
    }

    /// Writes `value` into the cell.
    pub fn set(&self, value: isize) {
        self.imp.set(value)
    }

    /// Increments the cell by one.
    pub fn inc(&self) {
        self.imp.add(1);
    }

    /// Decrements the cell by one; `true` iff the post-decrement value is
    /// zero. The counter is neither reset nor clamped.
    pub fn dec_and_test(&self) -> bool {
        self.imp.add(-1) == 1
    }

    /// Adds `value`; returns the pre-addition value.
    pub fn add(&self, value: isize) -> isize {
        self.imp.add(value)
    }

    /// Stores `new` iff the cell holds `old`; `true` iff the swap occurred.
    pub fn compare_and_exchange(&self, old: isize, new: isize) -> bool {
        self.imp.compare_and_exchange(old, new)
    }
}

/// Unsigned word-sized atomic cell with bitwise read-modify-writes.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicUint {
    imp: imp::Uint,
}

impl AtomicUint {
    /// Creates a cell holding `value`.
    pub const fn new(value: usize) -> AtomicUint {
        AtomicUint {
            imp: imp::Uint::new(value),
        }
    }

    /// Reads the cell.
    pub fn get(&self) -> usize {
        self.imp.get()
    }

    /// Writes `value` into the cell.
    pub fn set(&self, value: usize) {
        self.imp.set(value)
    }

    /// Bitwise-ANDs `value` into the cell; returns the old value.
    pub fn and(&self, value: usize) -> usize {
        self.imp.and(value)
    }

    /// Bitwise-ORs `value` into the cell; returns the old value.
    pub fn or(&self, value: usize) -> usize {
        self.imp.or(value)
    }

    /// Bitwise-XORs `value` into the cell; returns the old value.
    pub fn xor(&self, value: usize) -> usize {
        self.imp.xor(value)
    }

    /// Stores `new` iff the cell holds `old`; `true` iff the swap occurred.
    pub fn compare_and_exchange(&self, old: usize, new: usize) -> bool {
        self.imp.compare_and_exchange(old, new)
    }
}

/// Pointer-sized atomic cell.
///
/// The arithmetic and bitwise operations treat the cell as an address-sized
/// integer; no provenance is tracked through them.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicPtrCell {
    imp: imp::Uint,
}

impl AtomicPtrCell {
    /// Creates a cell holding `value`.
    pub const fn new(value: *mut c_void) -> AtomicPtrCell {
        AtomicPtrCell {
            // SAFETY: pointer-to-integer casts are not permitted in const
            // context; transmute achieves the same bit-for-bit conversion.
            imp: imp::Uint::new(unsafe { core::mem::transmute::<*mut c_void, usize>(value) }),
        }
    }

    /// Reads the cell.
    pub fn get(&self) -> *mut c_void {
        self.imp.get() as *mut c_void
    }

    /// Writes `value` into the cell.
    pub fn set(&self, value: *mut c_void) {
        self.imp.set(value as usize)
    }

    /// Stores `new` iff the cell holds `old`; `true` iff the swap occurred.
    pub fn compare_and_exchange(&self, old: *mut c_void, new: *mut c_void) -> bool {
        self.imp.compare_and_exchange(old as usize, new as usize)
    }

    /// Adds a byte offset; returns the pre-addition address.
    pub fn add(&self, value: isize) -> isize {
        self.imp.add_signed(value)
    }

    /// Bitwise-ANDs `value` into the cell; returns the old address bits.
    pub fn and(&self, value: usize) -> usize {
        self.imp.and(value)
    }

    /// Bitwise-ORs `value` into the cell; returns the old address bits.
    pub fn or(&self, value: usize) -> usize {
        self.imp.or(value)
    }

    /// Bitwise-XORs `value` into the cell; returns the old address bits.
    pub fn xor(&self, value: usize) -> usize {
        self.imp.xor(value)
    }
}

/// `true` iff the selected backend performs atomics without blocking.
pub fn is_lock_free() -> bool {
    imp::IS_LOCK_FREE
}

pub(crate) fn init() {
    imp::init();
}

pub(crate) fn shutdown() {
    imp::shutdown();
}

// ============================================================================
// Native backend: hardware atomics, sequentially consistent
// ============================================================================

#[cfg(not(feature = "emulated-atomics"))]
mod native {
    use core::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

    pub(super) const IS_LOCK_FREE: bool = true;

    #[derive(Debug)]
    #[repr(transparent)]
    pub(super) struct Int(AtomicIsize);

    impl Int {
        pub(super) const fn new(value: isize) -> Int {
            Int(AtomicIsize::new(value))
        }

        pub(super) fn get(&self) -> isize {
            self.0.load(Ordering::SeqCst)
        }

        pub(super) fn set(&self, value: isize) {
            self.0.store(value, Ordering::SeqCst)
        }

        pub(super) fn add(&self, value: isize) -> isize {
            self.0.fetch_add(value, Ordering::SeqCst)
        }

        pub(super) fn compare_and_exchange(&self, old: isize, new: isize) -> bool {
            self.0
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }
    }

    #[derive(Debug)]
    #[repr(transparent)]
    pub(super) struct Uint(AtomicUsize);

    impl Uint {
        pub(super) const fn new(value: usize) -> Uint {
            Uint(AtomicUsize::new(value))
        }

        pub(super) fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        pub(super) fn set(&self, value: usize) {
            self.0.store(value, Ordering::SeqCst)
        }

        pub(super) fn and(&self, value: usize) -> usize {
            self.0.fetch_and(value, Ordering::SeqCst)
        }

        pub(super) fn or(&self, value: usize) -> usize {
            self.0.fetch_or(value, Ordering::SeqCst)
        }

        pub(super) fn xor(&self, value: usize) -> usize {
            self.0.fetch_xor(value, Ordering::SeqCst)
        }

        pub(super) fn add_signed(&self, value: isize) -> isize {
            self.0.fetch_add(value as usize, Ordering::SeqCst) as isize
        }

        pub(super) fn compare_and_exchange(&self, old: usize, new: usize) -> bool {
            self.0
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }
    }

    pub(super) fn init() {}

    pub(super) fn shutdown() {}
}

// ============================================================================
// Emulated backend: one process-wide mutex serializes every operation
// ============================================================================
//
// Contention is proportional to total atomic traffic, not to cell count;
// this is the worst-case fallback, kept linearizable across all cells.

#[cfg(feature = "emulated-atomics")]
mod emulated {
    use core::cell::UnsafeCell;
    use core::ptr::NonNull;

    use strata_hal::imp::mutex::RawMutex;

    use crate::mem;

    pub(super) const IS_LOCK_FREE: bool = false;

    struct MutexSlot(UnsafeCell<Option<NonNull<RawMutex>>>);

    // SAFETY: written only inside the single-threaded lifecycle windows.
    unsafe impl Sync for MutexSlot {}

    static SERIAL_MUTEX: MutexSlot = MutexSlot(UnsafeCell::new(None));

    fn with_lock<R>(op: impl FnOnce() -> R) -> R {
        // SAFETY: concurrent readers only; writes are confined to init/shutdown.
        let mutex = match unsafe { *SERIAL_MUTEX.0.get() } {
            Some(mutex) => mutex,
            None => panic!("emulated atomics used outside the initialized lifecycle"),
        };
        // SAFETY: the mutex is live between init and shutdown.
        unsafe {
            mutex.as_ref().lock();
            let result = op();
            mutex.as_ref().unlock();
            result
        }
    }

    pub(super) fn init() {
        // SAFETY: single-threaded init window.
        if unsafe { (*SERIAL_MUTEX.0.get()).is_some() } {
            return;
        }
        let slot = match mem::alloc_uninit::<RawMutex>() {
            Some(slot) => slot,
            None => panic!("failed to allocate the atomics serialization mutex"),
        };
        // SAFETY: fresh pinned storage.
        if !unsafe { RawMutex::init(slot.as_ptr()) } {
            // SAFETY: init failed, storage is still raw.
            unsafe { mem::free_raw(slot) };
            panic!("failed to initialize the atomics serialization mutex");
        }
        // SAFETY: single-threaded init window.
        unsafe { *SERIAL_MUTEX.0.get() = Some(slot) };
    }

    pub(super) fn shutdown() {
        // SAFETY: single-threaded teardown window.
        if let Some(mutex) = unsafe { (*SERIAL_MUTEX.0.get()).take() } {
            // SAFETY: no user of the cell may outlive shutdown by contract.
            unsafe {
                RawMutex::destroy(mutex.as_ptr());
                mem::free_raw(mutex);
            }
        }
    }

    #[derive(Debug)]
    #[repr(transparent)]
    pub(super) struct Int(UnsafeCell<isize>);

    // SAFETY: all access is serialized through the process-wide mutex.
    unsafe impl Sync for Int {}
    unsafe impl Send for Int {}

    impl Int {
        pub(super) const fn new(value: isize) -> Int {
            Int(UnsafeCell::new(value))
        }

        pub(super) fn get(&self) -> isize {
            with_lock(|| unsafe { *self.0.get() })
        }

        pub(super) fn set(&self, value: isize) {
            with_lock(|| unsafe { *self.0.get() = value })
        }

        pub(super) fn add(&self, value: isize) -> isize {
            with_lock(|| unsafe {
                let old = *self.0.get();
                *self.0.get() = old.wrapping_add(value);
                old
            })
        }

        pub(super) fn compare_and_exchange(&self, old: isize, new: isize) -> bool {
            with_lock(|| unsafe {
                if *self.0.get() == old {
                    *self.0.get() = new;
                    true
                } else {
                    false
                }
            })
        }
    }

    #[derive(Debug)]
    #[repr(transparent)]
    pub(super) struct Uint(UnsafeCell<usize>);

    // SAFETY: all access is serialized through the process-wide mutex.
    unsafe impl Sync for Uint {}
    unsafe impl Send for Uint {}

    impl Uint {
        pub(super) const fn new(value: usize) -> Uint {
            Uint(UnsafeCell::new(value))
        }

        pub(super) fn get(&self) -> usize {
            with_lock(|| unsafe { *self.0.get() })
        }

        pub(super) fn set(&self, value: usize) {
            with_lock(|| unsafe { *self.0.get() = value })
        }

        pub(super) fn and(&self, value: usize) -> usize {
            with_lock(|| unsafe {
                let old = *self.0.get();
                *self.0.get() = old & value;
                old
            })
        }

        pub(super) fn or(&self, value: usize) -> usize {
            with_lock(|| unsafe {
                let old = *self.0.get();
                *self.0.get() = old | value;
                old
            })
        }

        pub(super) fn xor(&self, value: usize) -> usize {
            with_lock(|| unsafe {
                let old = *self.0.get();
                *self.0.get() = old ^ value;
                old
            })
        }

        pub(super) fn add_signed(&self, value: isize) -> isize {
            with_lock(|| unsafe {
                let old = *self.0.get();
                *self.0.get() = old.wrapping_add_signed(value);
                old as isize
            })
        }

        pub(super) fn compare_and_exchange(&self, old: usize, new: usize) -> bool {
            with_lock(|| unsafe {
                if *self.0.get() == old {
                    *self.0.get() = new;
                    true
                } else {
                    false
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn set_then_get() {
        test_support::init();
        let cell = AtomicInt::new(0);
        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cas_swaps_only_on_match() {
        test_support::init();
        let cell = AtomicInt::new(1);
        assert!(!cell.compare_and_exchange(2, 3));
        assert_eq!(cell.get(), 1);
        assert!(cell.compare_and_exchange(1, 3));
        assert_eq!(cell.get(), 3);
        // old == current still writes and reports success
        assert!(cell.compare_and_exchange(3, 3));
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn add_returns_pre_addition_value() {
        test_support::init();
        let cell = AtomicInt::new(10);
        assert_eq!(cell.add(5), 10);
        assert_eq!(cell.get(), 15);
        assert_eq!(cell.add(-20), 15);
        assert_eq!(cell.get(), -5);
    }

    #[test]
    fn inc_dec_pair() {
        test_support::init();
        let cell = AtomicInt::new(1);
        cell.inc();
        assert_eq!(cell.get(), 2);
        assert!(!cell.dec_and_test());
        assert!(cell.dec_and_test());
        assert_eq!(cell.get(), 0);
        // dec_and_test does not clamp at zero
        assert!(!cell.dec_and_test());
        assert_eq!(cell.get(), -1);
    }

    #[test]
    fn bitwise_return_old_values() {
        test_support::init();
        let cell = AtomicUint::new(0b1100);
        assert_eq!(cell.and(0b1010), 0b1100);
        assert_eq!(cell.get(), 0b1000);
        assert_eq!(cell.or(0b0011), 0b1000);
        assert_eq!(cell.get(), 0b1011);
        assert_eq!(cell.xor(0b1111), 0b1011);
        assert_eq!(cell.get(), 0b0100);
    }

    #[test]
    fn wraparound_at_word_bounds() {
        test_support::init();
        let cell = AtomicInt::new(isize::MAX);
        assert_eq!(cell.add(1), isize::MAX);
        assert_eq!(cell.get(), isize::MIN);
        cell.set(0);
        assert_eq!(cell.add(-1), 0);
        assert_eq!(cell.get(), -1);
    }

    #[test]
    fn pointer_cell_round_trip() {
        test_support::init();
        let cell = AtomicPtrCell::new(core::ptr::null_mut());
        assert!(cell.get().is_null());

        let marker = 0x1000 as *mut core::ffi::c_void;
        cell.set(marker);
        assert_eq!(cell.get(), marker);

        assert!(!cell.compare_and_exchange(core::ptr::null_mut(), marker));
        assert!(cell.compare_and_exchange(marker, core::ptr::null_mut()));
        assert!(cell.get().is_null());
    }

    #[test]
    fn pointer_arithmetic_returns_old_bits() {
        test_support::init();
        let cell = AtomicPtrCell::new(0x100 as *mut core::ffi::c_void);
        assert_eq!(cell.add(0x10), 0x100);
        assert_eq!(cell.get() as usize, 0x110);
        assert_eq!(cell.and(0xFF0), 0x110);
        assert_eq!(cell.get() as usize, 0x110);
        assert_eq!(cell.or(0x1), 0x110);
        assert_eq!(cell.xor(0x111), 0x111);
        assert_eq!(cell.get() as usize, 0);
    }

    #[test]
    fn lock_free_matches_backend() {
        assert_eq!(is_lock_free(), !cfg!(feature = "emulated-atomics"));
    }

    #[test]
    fn concurrent_increments_sum_up() {
        test_support::init();

        const N: usize = 1000;
        static CELL: AtomicInt = AtomicInt::new(0);

        let bump = || {
            for _ in 0..N {
                CELL.inc();
            }
        };
        let a = std::thread::spawn(bump);
        let b = std::thread::spawn(bump);
        a.join().unwrap();
        b.join().unwrap();

        assert_eq!(CELL.get(), (2 * N) as isize);
    }
}
