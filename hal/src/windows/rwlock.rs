//! Windows read-write lock: SRW by default, a spin-then-event emulation
//! as the build-time alternative.
//!
//! The emulated engine packs its whole state into one 32-bit word: reader
//! count in bits 0..15, count of threads parked on the event in bits 15..30,
//! writer-present in bit 30. Blocked acquirers spin with yields up to a
//! bounded iteration count before parking on a shared auto-reset event.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows_sys::Win32::System::Threading::{
    AcquireSRWLockExclusive, AcquireSRWLockShared, CreateEventA, ReleaseSRWLockExclusive,
    ReleaseSRWLockShared, SetEvent, TryAcquireSRWLockExclusive, TryAcquireSRWLockShared,
    WaitForSingleObject, INFINITE, SRWLOCK, SRWLOCK_INIT,
};

use super::thread::yield_now;

const READER_MASK: u32 = 0x0000_7FFF;
const WAITING_MASK: u32 = 0x3FFF_8000;
const WAITING_SHIFT: u32 = 15;
const WRITER_BIT: u32 = 0x4000_0000;

// TODO: inherited untuned; benchmark the spin bound against the SRW path.
const MAX_SPIN: u32 = 4000;

fn readers(word: u32) -> u32 {
    word & READER_MASK
}

fn with_readers(word: u32, count: u32) -> u32 {
    (word & !READER_MASK) | count
}

fn waiting(word: u32) -> u32 {
    (word & WAITING_MASK) >> WAITING_SHIFT
}

fn with_waiting(word: u32, count: u32) -> u32 {
    (word & !WAITING_MASK) | (count << WAITING_SHIFT)
}

fn is_writer(word: u32) -> bool {
    word & WRITER_BIT != 0
}

fn is_clear(word: u32) -> bool {
    word & (WRITER_BIT | READER_MASK) == 0
}

/// Engine choice, made once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Engine {
    Unset = 0,
    Srw = 1,
    Event = 2,
}

static ENGINE: AtomicU8 = AtomicU8::new(Engine::Unset as u8);

/// Selects the rwlock engine for the process.
///
/// Called by the library lifecycle before any lock is created.
pub fn init_engine() {
    let engine = if cfg!(feature = "emulated-rwlock") {
        Engine::Event
    } else {
        Engine::Srw
    };
    ENGINE.store(engine as u8, Ordering::Release);
    log::debug!("rwlock::init_engine: selected {engine:?}");
}

/// Clears the engine selection at shutdown.
pub fn shutdown_engine() {
    ENGINE.store(Engine::Unset as u8, Ordering::Release);
}

fn engine() -> Engine {
    match ENGINE.load(Ordering::Acquire) {
        1 => Engine::Srw,
        2 => Engine::Event,
        _ => {
            // Locks created before init get the native engine.
            Engine::Srw
        }
    }
}

struct EventLock {
    word: AtomicU32,
    event: HANDLE,
}

enum Imp {
    Srw(UnsafeCell<SRWLOCK>),
    Event(EventLock),
}

/// Shared/exclusive lock behind the process-wide engine selection.
pub struct RawRwLock {
    imp: Imp,
}

// SAFETY: both engines synchronize through kernel objects or atomics.
unsafe impl Send for RawRwLock {}
unsafe impl Sync for RawRwLock {}

impl core::fmt::Debug for RawRwLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawRwLock").finish_non_exhaustive()
    }
}

impl RawRwLock {
    /// Initializes a rwlock at `slot` using the selected engine.
    ///
    /// # Safety
    /// `slot` must be valid for writes and stay pinned until [`Self::destroy`].
    pub unsafe fn init(slot: *mut RawRwLock) -> bool {
        let imp = match engine() {
            Engine::Unset | Engine::Srw => Imp::Srw(UnsafeCell::new(SRWLOCK_INIT)),
            Engine::Event => {
                let event = unsafe { CreateEventA(ptr::null(), 0, 0, ptr::null()) };
                if event.is_null() {
                    log::error!("RawRwLock::init: CreateEventA() failed");
                    return false;
                }
                Imp::Event(EventLock {
                    word: AtomicU32::new(0),
                    event,
                })
            }
        };
        unsafe { ptr::write(slot, RawRwLock { imp }) };
        true
    }

    /// # Safety
    /// `self` must be initialized; the caller must not already hold the lock
    /// for writing.
    pub unsafe fn read_lock(&self) -> bool {
        match &self.imp {
            Imp::Srw(lock) => {
                unsafe { AcquireSRWLockShared(lock.get()) };
                true
            }
            Imp::Event(lock) => lock.read_lock(),
        }
    }

    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn try_read_lock(&self) -> bool {
        match &self.imp {
            Imp::Srw(lock) => unsafe { TryAcquireSRWLockShared(lock.get()) != 0 },
            Imp::Event(lock) => lock.try_read_lock(),
        }
    }

    /// # Safety
    /// The calling thread must hold a read lock.
    pub unsafe fn read_unlock(&self) -> bool {
        match &self.imp {
            Imp::Srw(lock) => {
                unsafe { ReleaseSRWLockShared(lock.get()) };
                true
            }
            Imp::Event(lock) => lock.read_unlock(),
        }
    }

    /// # Safety
    /// `self` must be initialized; the caller must not already hold the lock.
    pub unsafe fn write_lock(&self) -> bool {
        match &self.imp {
            Imp::Srw(lock) => {
                unsafe { AcquireSRWLockExclusive(lock.get()) };
                true
            }
            Imp::Event(lock) => lock.write_lock(),
        }
    }

    /// # Safety
    /// `self` must be initialized.
    pub unsafe fn try_write_lock(&self) -> bool {
        match &self.imp {
            Imp::Srw(lock) => unsafe { TryAcquireSRWLockExclusive(lock.get()) != 0 },
            Imp::Event(lock) => lock.try_write_lock(),
        }
    }

    /// # Safety
    /// The calling thread must hold the write lock.
    pub unsafe fn write_unlock(&self) -> bool {
        match &self.imp {
            Imp::Srw(lock) => {
                unsafe { ReleaseSRWLockExclusive(lock.get()) };
                true
            }
            Imp::Event(lock) => lock.write_unlock(),
        }
    }

    /// Destroys the rwlock at `slot`.
    ///
    /// # Safety
    /// The lock must be unheld; no further use is allowed.
    pub unsafe fn destroy(slot: *mut RawRwLock) {
        if let Imp::Event(lock) = unsafe { &(*slot).imp } {
            unsafe { CloseHandle(lock.event) };
        }
    }
}

impl EventLock {
    fn read_lock(&self) -> bool {
        let mut spin = 0u32;
        loop {
            let word = self.word.load(Ordering::SeqCst);
            if !is_writer(word) {
                let next = with_readers(word, readers(word) + 1);
                if self
                    .word
                    .compare_exchange(word, next, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            if spin < MAX_SPIN {
                spin += 1;
                yield_now();
                continue;
            }

            if !self.park(word) {
                continue;
            }
            spin = 0;
        }
    }

    fn try_read_lock(&self) -> bool {
        let word = self.word.load(Ordering::SeqCst);
        if is_writer(word) {
            return false;
        }
        let next = with_readers(word, readers(word) + 1);
        self.word
            .compare_exchange(word, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn read_unlock(&self) -> bool {
        loop {
            let word = self.word.load(Ordering::SeqCst);
            let count = readers(word);
            if count == 0 {
                return true;
            }
            if count == 1 && waiting(word) != 0 {
                // A duplicate wake-up notification is possible.
                if unsafe { SetEvent(self.event) } == 0 {
                    log::warn!("RawRwLock::read_unlock: SetEvent() failed");
                }
            }
            let next = with_readers(word, count - 1);
            if self
                .word
                .compare_exchange(word, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn write_lock(&self) -> bool {
        let mut spin = 0u32;
        loop {
            let word = self.word.load(Ordering::SeqCst);
            if is_clear(word) {
                if self
                    .word
                    .compare_exchange(word, word | WRITER_BIT, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            if spin < MAX_SPIN {
                spin += 1;
                yield_now();
                continue;
            }

            if !self.park(word) {
                continue;
            }
            spin = 0;
        }
    }

    fn try_write_lock(&self) -> bool {
        let word = self.word.load(Ordering::SeqCst);
        if !is_clear(word) {
            return false;
        }
        self.word
            .compare_exchange(word, word | WRITER_BIT, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn write_unlock(&self) -> bool {
        loop {
            let mut word;
            loop {
                word = self.word.load(Ordering::SeqCst);
                if !is_writer(word) {
                    return true;
                }
                if waiting(word) == 0 {
                    break;
                }
                // Only one end-of-write call can be in flight.
                if unsafe { SetEvent(self.event) } == 0 {
                    log::warn!("RawRwLock::write_unlock: SetEvent() failed");
                }
            }
            if self
                .word
                .compare_exchange(word, word & !WRITER_BIT, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Registers as a waiter for the state observed in `word` and parks on
    /// the event. Returns `false` when registration lost a race and the
    /// caller must re-observe.
    fn park(&self, word: u32) -> bool {
        let registered = with_waiting(word, waiting(word) + 1);
        if self
            .word
            .compare_exchange(word, registered, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if unsafe { WaitForSingleObject(self.event, INFINITE) } != WAIT_OBJECT_0 {
            log::warn!("RawRwLock::park: WaitForSingleObject() failed, going ahead");
        }

        loop {
            let word = self.word.load(Ordering::SeqCst);
            let next = with_waiting(word, waiting(word) - 1);
            if self
                .word
                .compare_exchange(word, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}
