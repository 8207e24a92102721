//! # Strata Platform Abstraction Layer
//!
//! Raw, policy-free wrappers over the host's native synchronization and
//! threading primitives. One backend module is selected at build time and
//! re-exported as [`imp`]; the library core layers ownership, allocation
//! and lifecycle policy on top of it.
//!
//! ## Module Organization
//!
//! - [`imp::mutex`]: exclusion primitive (`pthread_mutex_t` / CRITICAL_SECTION)
//! - [`imp::cond`]: condition variable
//! - [`imp::rwlock`]: native read-write lock (or the emulated engine)
//! - [`imp::thread`]: spawn, join, yield, sleep, priorities
//! - [`imp::tls`]: raw thread-local slots
//! - [`cpu`]: logical CPU probing
//! - [`priority`]: the portable priority ladder
//!
//! Everything in `imp` is `unsafe` by design: callers own placement,
//! pairing and teardown. Failures are reported as `false`/`None` with a
//! `log` diagnostic, never by panicking.

pub mod cpu;
pub mod priority;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod posix;
        pub use self::posix as imp;
    } else if #[cfg(windows)] {
        pub mod windows;
        pub use self::windows as imp;
    } else {
        compile_error!("strata-hal: no backend for this platform");
    }
}

pub use priority::Priority;

/// Destructor callback attached to a thread-local slot.
///
/// The callback receives the slot's value; it runs on the exiting thread.
pub type SlotDtor = unsafe extern "C" fn(*mut core::ffi::c_void);

/// Portable thread entry point, as passed to [`imp::thread::spawn`].
///
/// The signature mirrors the pthread start routine so the POSIX backend can
/// hand it to the kernel verbatim; other backends adapt it.
pub type ThreadEntry = extern "C" fn(*mut core::ffi::c_void) -> *mut core::ffi::c_void;

// Slot ids and thread ids travel through word-sized cells in the core.
static_assertions::const_assert!(
    core::mem::size_of::<usize>() >= core::mem::size_of::<u32>()
);
