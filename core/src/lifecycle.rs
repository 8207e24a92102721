//! Process-wide initialization and teardown.
//!
//! Subsystems come up in dependency order - allocator vtable, atomics,
//! rwlock globals, threads - and go down in reverse. Both entry points are
//! one-shot per cycle and must be called from a single thread, typically at
//! program start and end; neither is thread-safe, because they bootstrap
//! the threading subsystem itself.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::mem::MemVTable;
use crate::{atomic, mem, rwlock, thread};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the library with the system allocator.
pub fn init() {
    init_with(None);
}

/// Initializes the library with a custom allocator vtable, installed before
/// any internal allocation happens.
pub fn init_full(vtable: &MemVTable) {
    init_with(Some(vtable));
}

fn init_with(vtable: Option<&MemVTable>) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        log::warn!("lifecycle::init: already initialized");
        return;
    }

    mem::init(vtable);
    atomic::init();
    rwlock::init();
    thread::init();

    log::debug!("lifecycle::init: all subsystems up");
}

/// Tears the library down in reverse initialization order.
///
/// Releases the calling thread's record, frees the process-wide globals
/// and restores the default allocator. After shutdown the library may be
/// initialized again for a fresh cycle.
pub fn shutdown() {
    if !INITIALIZED.swap(false, Ordering::SeqCst) {
        log::warn!("lifecycle::shutdown: not initialized");
        return;
    }

    thread::shutdown();
    rwlock::shutdown();
    atomic::shutdown();
    mem::shutdown();

    log::debug!("lifecycle::shutdown: all subsystems down");
}

/// `true` between a completed [`init`] and the next [`shutdown`].
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}
