//! Whole-process lifecycle behavior: init/shutdown ordering, custom
//! allocator installation, TLS destructor accounting across shutdown, and
//! re-initialization for a second cycle.
//!
//! Everything runs in one test function: shutdown is process-wide and must
//! not race the other tests of a shared binary.

use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

use strata_core::{lifecycle, mem, thread, Key, MemVTable};

static ALLOCS: AtomicUsize = AtomicUsize::new(0);
static FREES: AtomicUsize = AtomicUsize::new(0);

fn counting_alloc(size: usize) -> *mut c_void {
    ALLOCS.fetch_add(1, Ordering::SeqCst);
    unsafe { libc::malloc(size) }
}

fn counting_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { libc::realloc(ptr, size) }
}

fn counting_free(ptr: *mut c_void) {
    FREES.fetch_add(1, Ordering::SeqCst);
    unsafe { libc::free(ptr) }
}

static DTOR_CALLS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn counting_dtor(_value: *mut c_void) {
    DTOR_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn full_lifecycle_cycle() {
    let _ = env_logger::builder().is_test(true).try_init();

    // ---- First cycle: custom allocator carries every core allocation ----
    let vtable = MemVTable {
        alloc: counting_alloc,
        realloc: counting_realloc,
        free: counting_free,
    };
    lifecycle::init_full(&vtable);
    assert!(lifecycle::is_initialized());

    // The thread subsystem allocated its globals through the vtable.
    assert!(ALLOCS.load(Ordering::SeqCst) > 0);

    // A second replacement within the cycle is refused.
    assert!(!mem::set_vtable(&vtable));

    // Spawned work still runs normally under the custom allocator.
    let worker = thread::create(|| 11, true).expect("spawn failed");
    assert_eq!(worker.join(), 11);
    drop(worker);

    // ---- TLS destructor sum across thread exits and shutdown ----
    const PER_THREAD: usize = 500;
    let key = Key::new(Some(counting_dtor)).expect("key creation failed");

    let chain = move || {
        for value in 1..=PER_THREAD {
            assert!(key.replace(value as *mut c_void));
        }
        0
    };
    let a = thread::create(chain, true).expect("spawn failed");
    let b = thread::create(chain, true).expect("spawn failed");
    assert_eq!(a.join(), 0);
    assert_eq!(b.join(), 0);
    drop(a);
    drop(b);
    key.free();

    let allocs_before_shutdown = ALLOCS.load(Ordering::SeqCst);
    lifecycle::shutdown();
    assert!(!lifecycle::is_initialized());

    // Each worker stored PER_THREAD values: all but the last destructed by
    // replace(), the last by the thread-exit sweep; shutdown added none for
    // already-exited threads.
    assert_eq!(DTOR_CALLS.load(Ordering::SeqCst), 2 * PER_THREAD);

    // Teardown released records through the same vtable it allocated from.
    assert!(FREES.load(Ordering::SeqCst) > 0);
    assert_eq!(ALLOCS.load(Ordering::SeqCst), allocs_before_shutdown);

    // ---- Second cycle: the library comes back up with the default stack ----
    lifecycle::init();
    assert!(lifecycle::is_initialized());

    let worker = thread::create(
        || {
            thread::sleep(5);
            23
        },
        true,
    )
    .expect("spawn failed");
    assert_eq!(worker.join(), 23);
    drop(worker);

    lifecycle::shutdown();
    assert!(!lifecycle::is_initialized());

    // Redundant transitions warn and do nothing.
    lifecycle::shutdown();
    assert!(!lifecycle::is_initialized());
}
