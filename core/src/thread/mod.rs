//! Threads: spawn, join, priorities, thread-local storage.
//!
//! A thread is a reference-counted record shared between the spawned
//! routine and the creating caller. Spawn publishes the record under the
//! process-wide just-spawned spinlock, which doubles as the release/acquire
//! barrier: everything the parent wrote before `create` returns is visible
//! to the new thread when the user routine starts.

use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::ptr::NonNull;
use std::panic::{catch_unwind, panic_any, AssertUnwindSafe};

use strata_hal::cpu;
use strata_hal::imp::thread as hal_thread;

pub use strata_hal::{Priority, SlotDtor};

mod dtors;
mod key;

pub use key::Key;

use crate::atomic::{AtomicInt, AtomicUint};
use crate::error::{Error, ErrorDomain, SysResult};
use crate::mem;

type ThreadRoutine = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// Panic payload carrying the code passed to [`exit`] back to the proxy.
struct ThreadExit(i32);

pub(crate) struct ThreadRecord {
    /// Two initial references for library threads: the spawned routine's
    /// (held through the current-thread slot) and the caller's.
    ref_count: AtomicInt,
    ret_code: AtomicInt,
    /// Spawned by this library, as opposed to adopted via [`current`].
    ours: bool,
    joinable: bool,
    routine: UnsafeCell<Option<ThreadRoutine>>,
    prio: AtomicUint,
    native: UnsafeCell<Option<hal_thread::Handle>>,
}

// SAFETY: mutable fields are either published under the spawn barrier
// (routine, native) or atomic (ref_count, ret_code, prio).
unsafe impl Send for ThreadRecord {}
unsafe impl Sync for ThreadRecord {}

/// Reference-counted handle to a thread.
///
/// Cloning takes a reference, dropping releases one; the record is freed
/// when the spawned routine and every handle have let go.
#[derive(Debug)]
pub struct Thread {
    rec: NonNull<ThreadRecord>,
}

// SAFETY: the record synchronizes itself; see ThreadRecord.
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

/// Opaque identifier of a platform thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(usize);

// ============================================================================
// Process-wide state
// ============================================================================

/// Just-spawned barrier: held by the parent while it publishes the record,
/// taken and dropped by the child before running the user routine.
static SPAWN_LOCK: spin::Mutex<()> = spin::Mutex::new(());

struct KeySlot(UnsafeCell<Option<Key>>);

// SAFETY: written only inside the single-threaded lifecycle windows.
unsafe impl Sync for KeySlot {}

/// Key resolving to the calling thread's record.
static CURRENT_KEY: KeySlot = KeySlot(UnsafeCell::new(None));

fn current_key() -> Option<Key> {
    // SAFETY: concurrent readers only; writes are confined to init/shutdown.
    unsafe { *CURRENT_KEY.0.get() }
}

fn current_record() -> Option<NonNull<ThreadRecord>> {
    let key = current_key()?;
    NonNull::new(key.get() as *mut ThreadRecord)
}

fn set_current_record(rec: NonNull<ThreadRecord>) -> bool {
    match current_key() {
        Some(key) => key.set(rec.as_ptr() as *mut c_void),
        None => {
            log::error!("thread: used outside the initialized lifecycle");
            false
        }
    }
}

/// Destructor of the current-thread key: drops the slot's reference.
unsafe extern "C" fn current_record_cleanup(value: *mut c_void) {
    if let Some(rec) = NonNull::new(value as *mut ThreadRecord) {
        unref(rec);
    }
}

pub(crate) fn init() {
    key::init();

    // SAFETY: single-threaded init window.
    if unsafe { (*CURRENT_KEY.0.get()).is_none() } {
        let cleanup: SlotDtor = current_record_cleanup;
        let key = match Key::new(Some(cleanup)) {
            Ok(key) => key,
            Err(err) => panic!("failed to create the current-thread key: {err}"),
        };
        // SAFETY: single-threaded init window.
        unsafe { *CURRENT_KEY.0.get() = Some(key) };
    }

    install_exit_hook();
}

/// Keeps [`exit`]'s control-flow unwind out of the panic report; everything
/// else goes to whatever hook was installed before. Installed once per
/// process and left in place: the delegation preserves prior behavior.
fn install_exit_hook() {
    static HOOK: std::sync::Once = std::sync::Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ThreadExit>().is_none() {
                previous(info);
            }
        }));
    });
}

pub(crate) fn shutdown() {
    // Drop the calling thread's record reference before the key goes away.
    if let Some(rec) = current_record() {
        unref(rec);
        if let Some(key) = current_key() {
            key.set(core::ptr::null_mut());
        }
    }

    // SAFETY: single-threaded teardown window.
    if let Some(key) = unsafe { (*CURRENT_KEY.0.get()).take() } {
        key.free();
    }

    dtors::shutdown();
    key::shutdown();
}

// ============================================================================
// Spawn protocol
// ============================================================================

/// Proxy routine running on the new platform thread.
extern "C" fn thread_proxy(arg: *mut c_void) -> *mut c_void {
    let Some(rec) = NonNull::new(arg as *mut ThreadRecord) else {
        return core::ptr::null_mut();
    };

    // The routine's reference moves into the current-thread slot; the slot
    // destructor releases it at thread exit.
    set_current_record(rec);

    // Barrier: the parent has finished publishing the record.
    drop(SPAWN_LOCK.lock());

    // SAFETY: published before the barrier released; only this thread takes it.
    let routine = unsafe { (*rec.as_ref().routine.get()).take() };
    let code = match routine {
        Some(routine) => run_routine(routine),
        None => {
            log::error!("thread: spawned record carries no routine");
            -1
        }
    };

    // SAFETY: rec stays live: the slot still holds the routine's reference.
    unsafe { rec.as_ref() }.ret_code.set(code as isize);

    // Fixed-point destructor sweep for chain backends; native-destructor
    // backends run theirs after this routine returns.
    dtors::run_thread_dtors();

    core::ptr::null_mut()
}

/// Runs the user routine without ever unwinding across the proxy.
fn run_routine(routine: ThreadRoutine) -> i32 {
    match catch_unwind(AssertUnwindSafe(move || routine())) {
        Ok(code) => code,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(_) => {
                log::error!("thread: routine panicked; storing -1 as its return code");
                -1
            }
        },
    }
}

/// Spawns a thread running `routine` with inherited priority and the
/// platform's default stack.
pub fn create<F>(routine: F, joinable: bool) -> SysResult<Thread>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    create_full(routine, joinable, Priority::Inherit, 0)
}

/// Spawns a thread running `routine`.
///
/// A non-zero `stack_size` below the platform minimum is clamped up. The
/// returned handle is one of the record's two initial references; the
/// spawned routine holds the other.
pub fn create_full<F>(
    routine: F,
    joinable: bool,
    prio: Priority,
    stack_size: usize,
) -> SysResult<Thread>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let guard = SPAWN_LOCK.lock();

    let rec = mem::alloc_record(ThreadRecord {
        ref_count: AtomicInt::new(2),
        ret_code: AtomicInt::new(0),
        ours: true,
        joinable,
        routine: UnsafeCell::new(None),
        prio: AtomicUint::new(prio.index()),
        native: UnsafeCell::new(None),
    })
    .ok_or_else(|| {
        log::error!("thread::create_full: failed to allocate thread record");
        Error::new(
            ErrorDomain::NoResources,
            0,
            "failed to allocate thread record",
        )
    })?;

    // SAFETY: the proxy blocks on the spawn lock until the record below is
    // fully published, so handing it the pointer early is sound.
    let handle = unsafe {
        hal_thread::spawn(
            thread_proxy,
            rec.as_ptr() as *mut c_void,
            joinable,
            prio,
            stack_size,
        )
    };
    let Some(handle) = handle else {
        // SAFETY: the proxy never ran; the record is still exclusively ours.
        unsafe { mem::free_record(rec) };
        drop(guard);
        return Err(Error::with_system(
            ErrorDomain::Backend,
            "failed to spawn platform thread",
        ));
    };

    // SAFETY: the spawn lock is still held; the child has not passed the
    // barrier and nothing else references these cells.
    unsafe {
        *rec.as_ref().native.get() = Some(handle);
        *rec.as_ref().routine.get() = Some(Box::new(routine));
    }

    drop(guard);
    Ok(Thread { rec })
}

// ============================================================================
// Reference counting
// ============================================================================

pub(crate) fn unref(rec: NonNull<ThreadRecord>) {
    // SAFETY: the caller holds a reference, so the record is live.
    let record = unsafe { rec.as_ref() };
    if record.ref_count.dec_and_test() {
        if record.ours {
            // SAFETY: last reference; nobody else touches the handle cell.
            if let Some(handle) = unsafe { (*record.native.get()).take() } {
                // SAFETY: the handle is released exactly once, here.
                unsafe { hal_thread::release(handle) };
            }
        }
        // SAFETY: last reference.
        unsafe { mem::free_record(rec) };
    }
}

impl Clone for Thread {
    fn clone(&self) -> Thread {
        // SAFETY: self holds a reference, so the record is live.
        unsafe { self.rec.as_ref() }.ref_count.inc();
        Thread { rec: self.rec }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        unref(self.rec);
    }
}

// ============================================================================
// Thread operations
// ============================================================================

impl Thread {
    fn record(&self) -> &ThreadRecord {
        // SAFETY: self holds a reference, so the record is live.
        unsafe { self.rec.as_ref() }
    }

    /// Waits for the thread and returns its stored return code.
    ///
    /// Returns `-1` for a non-joinable or adopted thread. A joinable thread
    /// may be joined exactly once; the record itself is freed by reference
    /// count, not by join.
    pub fn join(&self) -> i32 {
        let record = self.record();
        if !record.joinable {
            return -1;
        }
        // SAFETY: the handle cell is published since spawn and taken only by
        // the final unref, which cannot run while self holds a reference.
        let Some(handle) = (unsafe { (*record.native.get()).as_ref() }) else {
            return -1;
        };
        // SAFETY: joinable and not yet joined per the caller contract.
        unsafe { hal_thread::join(handle) };
        record.ret_code.get() as i32
    }

    /// Re-applies a priority to the running thread.
    ///
    /// `Inherit` resolves to the calling thread's recorded priority, or
    /// `Normal` when there is none. On platforms without scheduling control
    /// the update is record-only and reported as applied.
    pub fn set_priority(&self, prio: Priority) -> bool {
        let record = self.record();

        let resolved = if prio == Priority::Inherit {
            current_priority().unwrap_or(Priority::Normal)
        } else {
            prio
        };

        // SAFETY: see join() for the handle cell discipline.
        let Some(handle) = (unsafe { (*record.native.get()).as_ref() }) else {
            log::warn!("Thread::set_priority: no platform handle for this record");
            return false;
        };
        // SAFETY: the thread is live while the record holds its handle.
        if !unsafe { hal_thread::set_priority(handle, resolved) } {
            return false;
        }
        record.prio.set(resolved.index());
        true
    }

    /// The priority recorded for this thread.
    pub fn priority(&self) -> Priority {
        Priority::from_index(self.record().prio.get()).unwrap_or(Priority::Normal)
    }
}

fn current_priority() -> Option<Priority> {
    let rec = current_record()?;
    // SAFETY: the slot holds a reference, so the record is live.
    let prio = Priority::from_index(unsafe { rec.as_ref() }.prio.get())?;
    if prio == Priority::Inherit {
        None
    } else {
        Some(prio)
    }
}

/// Terminates the calling library thread, storing `code` for [`Thread::join`].
///
/// Pending thread-local destructors still run. Calling this from a thread
/// the library did not create is rejected with a warning; the foreign
/// thread keeps running.
pub fn exit(code: i32) {
    match current_record() {
        // SAFETY: the slot holds a reference, so the record is live.
        Some(rec) if unsafe { rec.as_ref() }.ours => {
            panic_any(ThreadExit(code));
        }
        _ => {
            log::warn!("thread::exit: cannot be called from a foreign thread");
        }
    }
}

/// The calling thread's record, adopting foreign threads on first call.
///
/// A thread the library did not spawn gets a minimal record (non-joinable,
/// not owned by the library) stored in its current-thread slot. `None` only
/// on allocation failure or before initialization.
pub fn current() -> Option<Thread> {
    if let Some(rec) = current_record() {
        // SAFETY: the slot holds a reference, so the record is live.
        unsafe { rec.as_ref() }.ref_count.inc();
        return Some(Thread { rec });
    }

    let rec = mem::alloc_record(ThreadRecord {
        ref_count: AtomicInt::new(1),
        ret_code: AtomicInt::new(0),
        ours: false,
        joinable: false,
        routine: UnsafeCell::new(None),
        prio: AtomicUint::new(Priority::Inherit.index()),
        native: UnsafeCell::new(None),
    });
    let Some(rec) = rec else {
        log::error!("thread::current: failed to allocate thread record");
        return None;
    };

    if !set_current_record(rec) {
        // SAFETY: never published.
        unsafe { mem::free_record(rec) };
        return None;
    }

    // One reference lives in the slot, one in the returned handle.
    // SAFETY: just allocated and published by this thread.
    unsafe { rec.as_ref() }.ref_count.inc();
    Some(Thread { rec })
}

/// Opaque identifier of the calling platform thread.
pub fn current_id() -> ThreadId {
    ThreadId(hal_thread::current_id())
}

/// Hints the scheduler to run someone else.
pub fn yield_now() {
    hal_thread::yield_now();
}

/// Blocks the calling thread at least `msec` milliseconds.
///
/// Signal interruptions are retried with the remaining time. Returns `0` on
/// success, `-1` on a non-recoverable error.
pub fn sleep(msec: u32) -> i32 {
    hal_thread::sleep_ms(msec)
}

/// Number of logical processors; `1` when the platform probe fails.
pub fn ideal_count() -> i32 {
    cpu::logical_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn join_returns_routine_code() {
        test_support::init();
        let thread = create(|| 42, true).expect("spawn failed");
        assert_eq!(thread.join(), 42);
    }

    #[test]
    fn join_returns_exit_code() {
        test_support::init();
        let thread = create(
            || {
                sleep(10);
                exit(42);
                // Unreachable: exit() does not return on library threads.
                0
            },
            true,
        )
        .expect("spawn failed");
        assert_eq!(thread.join(), 42);
    }

    #[test]
    fn join_on_non_joinable_is_rejected() {
        test_support::init();
        static DONE: AtomicUsize = AtomicUsize::new(0);
        let thread = create(
            || {
                DONE.fetch_add(1, Ordering::SeqCst);
                0
            },
            false,
        )
        .expect("spawn failed");
        assert_eq!(thread.join(), -1);

        while DONE.load(Ordering::SeqCst) == 0 {
            sleep(1);
        }
    }

    #[test]
    fn panicking_routine_stores_minus_one() {
        test_support::init();
        let thread = create(|| panic!("routine failure"), true).expect("spawn failed");
        assert_eq!(thread.join(), -1);
    }

    #[test]
    fn spawn_barrier_publishes_parent_writes() {
        test_support::init();
        // The routine reads a value the parent wrote just before create().
        let witness = Box::new(1234usize);
        let addr: &'static usize = Box::leak(witness);
        let thread = create(move || *addr as i32 - 1234, true).expect("spawn failed");
        assert_eq!(thread.join(), 0);
    }

    #[test]
    fn clone_keeps_record_alive() {
        test_support::init();
        let thread = create(|| 7, true).expect("spawn failed");
        let alias = thread.clone();
        assert_eq!(thread.join(), 7);
        drop(thread);
        assert_eq!(alias.record().ret_code.get(), 7);
    }

    #[test]
    fn current_adopts_foreign_threads() {
        test_support::init();
        let adopted = std::thread::spawn(|| {
            let me = current().expect("adoption failed");
            let again = current().expect("second lookup failed");
            me.rec == again.rec
        })
        .join()
        .unwrap();
        assert!(adopted);
    }

    #[test]
    fn exit_from_foreign_thread_is_rejected() {
        test_support::init();
        std::thread::spawn(|| {
            // Must warn and return rather than terminate the thread.
            exit(99);
            true
        })
        .join()
        .unwrap();
    }

    #[test]
    fn current_identity_inside_library_thread() {
        test_support::init();
        let thread = create(
            || {
                let me = current().expect("current failed");
                // A library thread's record is marked ours.
                i32::from(me.record().ours)
            },
            true,
        )
        .expect("spawn failed");
        assert_eq!(thread.join(), 1);
    }

    #[test]
    fn ideal_count_is_positive() {
        test_support::init();
        assert!(ideal_count() >= 1);
    }

    #[test]
    fn sleep_smoke() {
        test_support::init();
        let started = std::time::Instant::now();
        assert_eq!(sleep(15), 0);
        assert!(started.elapsed() >= std::time::Duration::from_millis(15));
    }

    #[test]
    fn priorities_apply_per_ladder() {
        test_support::init();
        let thread = create_full(
            || {
                sleep(30);
                0
            },
            true,
            Priority::Normal,
            0,
        )
        .expect("spawn failed");
        assert_eq!(thread.priority(), Priority::Normal);
        // Lowering within the ladder is accepted where the host allows it;
        // the record tracks the request either way.
        if thread.set_priority(Priority::Low) {
            assert_eq!(thread.priority(), Priority::Low);
        }
        thread.join();
    }

    #[test]
    fn stack_size_request_is_honored() {
        test_support::init();
        let thread = create_full(|| 5, true, Priority::Inherit, 256 * 1024).expect("spawn failed");
        assert_eq!(thread.join(), 5);
    }

    // TLS destructor accounting across two worker threads; the shutdown
    // half of the scenario lives in the lifecycle integration test.
    static DTOR_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_dtor(_value: *mut c_void) {
        DTOR_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn replace_chain_fires_dtor_per_stored_value() {
        test_support::init();

        const PER_THREAD: usize = 500;
        let key = Key::new(Some(count_dtor)).expect("key creation failed");

        let worker = move || {
            for value in 1..=PER_THREAD {
                assert!(key.replace(value as *mut c_void));
            }
            0
        };

        let a = create(worker, true).expect("spawn failed");
        let b = create(worker, true).expect("spawn failed");
        assert_eq!(a.join(), 0);
        assert_eq!(b.join(), 0);

        // Each thread replaced PER_THREAD values: PER_THREAD - 1 destructed
        // by replace(), the final one by the thread-exit sweep.
        let expected = 2 * PER_THREAD;
        while DTOR_CALLS.load(Ordering::SeqCst) < expected {
            sleep(1);
        }
        assert_eq!(DTOR_CALLS.load(Ordering::SeqCst), expected);
    }
}
