//! POSIX thread primitives: spawn, join, yield, sleep, priorities.

use core::ffi::c_void;
use core::mem::MaybeUninit;

use crate::{Priority, ThreadEntry};

/// Owned handle to a spawned platform thread.
///
/// For detached threads the handle is inert after spawn; for joinable
/// threads it may be passed to [`join`] exactly once.
pub struct Handle {
    raw: libc::pthread_t,
}

impl core::fmt::Debug for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}

// SAFETY: pthread_t is a kernel identifier, freely movable across threads.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

// Scheduling-control hooks. The libc crate does not export the full
// pthread_attr sched surface on every unix, so the Linux path declares what
// it needs directly against the platform ABI.
#[cfg(any(target_os = "linux", target_os = "android"))]
mod sched {
    use libc::{c_int, pthread_attr_t, pthread_t, sched_param};

    pub const PTHREAD_INHERIT_SCHED: c_int = 0;
    pub const PTHREAD_EXPLICIT_SCHED: c_int = 1;
    pub const SCHED_IDLE: c_int = 5;

    extern "C" {
        pub fn pthread_attr_setinheritsched(attr: *mut pthread_attr_t, inherit: c_int) -> c_int;
        pub fn pthread_attr_getschedpolicy(attr: *const pthread_attr_t, policy: *mut c_int)
            -> c_int;
        pub fn pthread_attr_setschedpolicy(attr: *mut pthread_attr_t, policy: c_int) -> c_int;
        pub fn pthread_attr_setschedparam(
            attr: *mut pthread_attr_t,
            param: *const sched_param,
        ) -> c_int;
        pub fn pthread_getschedparam(
            thread: pthread_t,
            policy: *mut c_int,
            param: *mut sched_param,
        ) -> c_int;
        pub fn pthread_setschedparam(
            thread: pthread_t,
            policy: c_int,
            param: *const sched_param,
        ) -> c_int;
        pub fn sched_get_priority_min(policy: c_int) -> c_int;
        pub fn sched_get_priority_max(policy: c_int) -> c_int;
    }
}

/// Projects the portable ladder onto `[sched_min, sched_max]` for `policy`.
///
/// Returns the policy (possibly switched to `SCHED_IDLE`) and the native
/// priority, or `None` when the range probe fails.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn project_priority(prio: Priority, policy: libc::c_int) -> Option<(libc::c_int, libc::c_int)> {
    if prio == Priority::Idle {
        return Some((sched::SCHED_IDLE, 0));
    }

    // With a dedicated idle policy the ladder proper starts at Lowest.
    let low_bound = Priority::Lowest.index() as libc::c_int;
    let upper_bound = Priority::TimeCritical.index() as libc::c_int;

    let prio_min = unsafe { sched::sched_get_priority_min(policy) };
    let prio_max = unsafe { sched::sched_get_priority_max(policy) };
    if prio_min == -1 || prio_max == -1 {
        return None;
    }

    let native = (prio.index() as libc::c_int - low_bound) * (prio_max - prio_min) / upper_bound
        + prio_min;

    Some((policy, native.clamp(prio_min, prio_max)))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn apply_spawn_priority(attr: *mut libc::pthread_attr_t, prio: Priority) {
    if prio == Priority::Inherit {
        if unsafe { sched::pthread_attr_setinheritsched(attr, sched::PTHREAD_INHERIT_SCHED) } != 0
        {
            log::warn!("thread::spawn: pthread_attr_setinheritsched() failed");
        }
        return;
    }

    let mut policy: libc::c_int = 0;
    if unsafe { sched::pthread_attr_getschedpolicy(attr, &mut policy) } != 0 {
        log::warn!("thread::spawn: pthread_attr_getschedpolicy() failed");
        return;
    }

    match project_priority(prio, policy) {
        Some((policy, native)) => {
            let mut param: libc::sched_param = unsafe { core::mem::zeroed() };
            param.sched_priority = native;

            let failed = unsafe {
                sched::pthread_attr_setinheritsched(attr, sched::PTHREAD_EXPLICIT_SCHED) != 0
                    || sched::pthread_attr_setschedpolicy(attr, policy) != 0
                    || sched::pthread_attr_setschedparam(attr, &param) != 0
            };
            if failed {
                log::warn!("thread::spawn: failed to set spawn priority");
            }
        }
        None => log::warn!("thread::spawn: priority range probe failed"),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn apply_spawn_priority(_attr: *mut libc::pthread_attr_t, _prio: Priority) {
    // No scheduling control on this unix; the priority stays a record-only
    // attribute of the thread record.
}

/// Spawns a platform thread running `entry(arg)`.
///
/// A non-zero `stack_size` below the platform minimum is clamped up. A spawn
/// rejected with `EPERM` (explicit scheduling not permitted) is retried once
/// with inherited scheduling.
///
/// # Safety
/// `arg` must stay valid until `entry` has consumed it.
pub unsafe fn spawn(
    entry: ThreadEntry,
    arg: *mut c_void,
    joinable: bool,
    prio: Priority,
    stack_size: usize,
) -> Option<Handle> {
    let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
    if unsafe { libc::pthread_attr_init(attr.as_mut_ptr()) } != 0 {
        log::error!("thread::spawn: pthread_attr_init() failed");
        return None;
    }

    let detach_state = if joinable {
        libc::PTHREAD_CREATE_JOINABLE
    } else {
        libc::PTHREAD_CREATE_DETACHED
    };
    if unsafe { libc::pthread_attr_setdetachstate(attr.as_mut_ptr(), detach_state) } != 0 {
        log::error!("thread::spawn: pthread_attr_setdetachstate() failed");
        unsafe { libc::pthread_attr_destroy(attr.as_mut_ptr()) };
        return None;
    }

    unsafe { apply_spawn_priority(attr.as_mut_ptr(), prio) };

    if stack_size > 0 {
        let mut stack_size = stack_size;
        let min_stack = unsafe { libc::sysconf(libc::_SC_THREAD_STACK_MIN) };
        if min_stack > 0 {
            if stack_size < min_stack as usize {
                stack_size = min_stack as usize;
            }
        } else {
            log::warn!("thread::spawn: sysconf(_SC_THREAD_STACK_MIN) failed");
        }
        if unsafe { libc::pthread_attr_setstacksize(attr.as_mut_ptr(), stack_size) } != 0 {
            log::warn!("thread::spawn: pthread_attr_setstacksize() failed");
        }
    }

    let mut raw: libc::pthread_t = unsafe { core::mem::zeroed() };
    let mut create_code =
        unsafe { libc::pthread_create(&mut raw, attr.as_ptr(), entry, arg) };

    if create_code == libc::EPERM {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        unsafe {
            sched::pthread_attr_setinheritsched(attr.as_mut_ptr(), sched::PTHREAD_INHERIT_SCHED);
        }
        create_code = unsafe { libc::pthread_create(&mut raw, attr.as_ptr(), entry, arg) };
    }

    unsafe { libc::pthread_attr_destroy(attr.as_mut_ptr()) };

    if create_code != 0 {
        log::error!("thread::spawn: pthread_create() failed with {create_code}");
        return None;
    }

    Some(Handle { raw })
}

/// Blocks until the thread behind `handle` has terminated.
///
/// # Safety
/// The thread must have been spawned joinable and not joined before.
pub unsafe fn join(handle: &Handle) -> bool {
    if unsafe { libc::pthread_join(handle.raw, core::ptr::null_mut()) } != 0 {
        log::error!("thread::join: pthread_join() failed");
        return false;
    }
    true
}

/// Releases a handle without joining.
///
/// # Safety
/// The handle must not be used afterwards.
pub unsafe fn release(handle: Handle) {
    // pthread_t carries no process-held resource of its own.
    let _ = handle;
}

/// Re-applies `prio` to a running thread.
///
/// # Safety
/// The thread behind `handle` must still be running or joinable.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe fn set_priority(handle: &Handle, prio: Priority) -> bool {
    debug_assert!(prio != Priority::Inherit, "inherit is resolved by the caller");

    let mut policy: libc::c_int = 0;
    let mut param: libc::sched_param = unsafe { core::mem::zeroed() };
    if unsafe { sched::pthread_getschedparam(handle.raw, &mut policy, &mut param) } != 0 {
        log::error!("thread::set_priority: pthread_getschedparam() failed");
        return false;
    }

    let Some((policy, native)) = project_priority(prio, policy) else {
        log::error!("thread::set_priority: priority range probe failed");
        return false;
    };

    param = unsafe { core::mem::zeroed() };
    param.sched_priority = native;

    if unsafe { sched::pthread_setschedparam(handle.raw, policy, &param) } != 0 {
        log::error!("thread::set_priority: pthread_setschedparam() failed");
        return false;
    }
    true
}

/// Without scheduling control the update is record-only and reported as
/// having been applied.
///
/// # Safety
/// The thread behind `handle` must still be running or joinable.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub unsafe fn set_priority(handle: &Handle, prio: Priority) -> bool {
    let _ = (handle, prio);
    true
}

/// Yields the processor to the scheduler.
pub fn yield_now() {
    unsafe { libc::sched_yield() };
}

/// Sleeps at least `msec` milliseconds, transparently retrying `EINTR`.
///
/// Returns `0` on success, `-1` on a non-recoverable error.
pub fn sleep_ms(msec: u32) -> i32 {
    let mut request = libc::timespec {
        tv_sec: (msec / 1000) as libc::time_t,
        tv_nsec: ((msec % 1000) as libc::c_long) * 1_000_000,
    };
    let mut remain = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    loop {
        if unsafe { libc::nanosleep(&request, &mut remain) } == 0 {
            return 0;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno != libc::EINTR {
            log::error!("thread::sleep_ms: nanosleep() failed with {errno}");
            return -1;
        }
        request = remain;
    }
}

/// Opaque identifier of the calling thread.
pub fn current_id() -> usize {
    unsafe { libc::pthread_self() as usize }
}
