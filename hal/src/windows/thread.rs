//! Win32 thread primitives: spawn, join, yield, sleep, priorities.

use core::ffi::c_void;
use core::ptr;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows_sys::Win32::System::Threading::{
    CreateThread, GetCurrentThread, GetCurrentThreadId, GetThreadPriority, ResumeThread,
    SetThreadPriority, Sleep, WaitForSingleObject, CREATE_SUSPENDED, INFINITE,
    THREAD_PRIORITY_ABOVE_NORMAL, THREAD_PRIORITY_BELOW_NORMAL, THREAD_PRIORITY_HIGHEST,
    THREAD_PRIORITY_IDLE, THREAD_PRIORITY_LOWEST, THREAD_PRIORITY_NORMAL,
    THREAD_PRIORITY_TIME_CRITICAL,
};

use crate::{Priority, ThreadEntry};

/// Owned handle to a spawned platform thread.
pub struct Handle {
    raw: HANDLE,
}

impl core::fmt::Debug for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}

// SAFETY: a thread HANDLE may be waited on and closed from any thread.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

struct StartCtx {
    entry: ThreadEntry,
    arg: *mut c_void,
}

unsafe extern "system" fn start_routine(param: *mut c_void) -> u32 {
    let ctx = unsafe { Box::from_raw(param as *mut StartCtx) };
    (ctx.entry)(ctx.arg);
    0
}

fn native_priority(prio: Priority) -> i32 {
    match prio {
        Priority::Idle => THREAD_PRIORITY_IDLE,
        Priority::Lowest => THREAD_PRIORITY_LOWEST,
        Priority::Low => THREAD_PRIORITY_BELOW_NORMAL,
        Priority::Normal => THREAD_PRIORITY_NORMAL,
        Priority::High => THREAD_PRIORITY_ABOVE_NORMAL,
        Priority::Highest => THREAD_PRIORITY_HIGHEST,
        Priority::TimeCritical => THREAD_PRIORITY_TIME_CRITICAL,
        // Whatever the spawning thread currently runs at.
        Priority::Inherit => unsafe { GetThreadPriority(GetCurrentThread()) },
    }
}

/// Spawns a platform thread running `entry(arg)`.
///
/// The thread is created suspended, given its priority, then resumed, so it
/// never runs at the wrong priority.
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
    let _ = joinable; // detach state is a record-level property on Win32

    let ctx = Box::into_raw(Box::new(StartCtx { entry, arg }));

    let raw = unsafe {
        CreateThread(
            ptr::null(),
            stack_size,
            Some(start_routine),
            ctx as *const c_void,
            CREATE_SUSPENDED,
            ptr::null_mut(),
        )
    };
    if raw.is_null() {
        log::error!("thread::spawn: CreateThread() failed");
        drop(unsafe { Box::from_raw(ctx) });
        return None;
    }

    if unsafe { SetThreadPriority(raw, native_priority(prio)) } == 0 {
        log::warn!("thread::spawn: SetThreadPriority() failed");
    }

    if unsafe { ResumeThread(raw) } == u32::MAX {
        log::error!("thread::spawn: ResumeThread() failed");
        unsafe { CloseHandle(raw) };
        // The thread never ran; reclaim its start context.
        drop(unsafe { Box::from_raw(ctx) });
        return None;
    }

    Some(Handle { raw })
}

/// Blocks until the thread behind `handle` has terminated.
///
/// # Safety
/// The thread must have been spawned joinable and not joined before.
pub unsafe fn join(handle: &Handle) -> bool {
    if unsafe { WaitForSingleObject(handle.raw, INFINITE) } != WAIT_OBJECT_0 {
        log::error!("thread::join: WaitForSingleObject() failed");
        return false;
    }
    true
}

/// Closes the thread handle without joining.
///
/// # Safety
/// The handle must not be used afterwards.
pub unsafe fn release(handle: Handle) {
    unsafe { CloseHandle(handle.raw) };
}

/// Re-applies `prio` to a running thread.
///
/// # Safety
/// The thread behind `handle` must still be running or joinable.
pub unsafe fn set_priority(handle: &Handle, prio: Priority) -> bool {
    if unsafe { SetThreadPriority(handle.raw, native_priority(prio)) } == 0 {
        log::error!("thread::set_priority: SetThreadPriority() failed");
        return false;
    }
    true
}

/// Yields the processor to the scheduler.
pub fn yield_now() {
    unsafe { Sleep(0) };
}

/// Sleeps at least `msec` milliseconds.
///
/// Returns `0`; Win32 `Sleep` reports no errors.
pub fn sleep_ms(msec: u32) -> i32 {
    unsafe { Sleep(msec) };
    0
}

/// Opaque identifier of the calling thread.
pub fn current_id() -> usize {
    unsafe { GetCurrentThreadId() as usize }
}
