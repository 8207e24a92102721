//! Logical CPU probing.

/// Returns the number of logical processors currently online.
///
/// Falls back to `1` when the platform probe fails; never returns zero.
pub fn logical_count() -> i32 {
    imp_logical_count()
}

#[cfg(unix)]
fn imp_logical_count() -> i32 {
    // SAFETY: sysconf has no memory preconditions.
    let cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };

    if cores < 1 {
        log::warn!("cpu::logical_count: sysconf(_SC_NPROCESSORS_ONLN) failed");
        return 1;
    }

    cores as i32
}

#[cfg(windows)]
fn imp_logical_count() -> i32 {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    let mut info: SYSTEM_INFO = unsafe { core::mem::zeroed() };
    // SAFETY: the out-pointer is a valid SYSTEM_INFO.
    unsafe { GetSystemInfo(&mut info) };

    if info.dwNumberOfProcessors == 0 {
        log::warn!("cpu::logical_count: GetSystemInfo() reported zero processors");
        return 1;
    }

    info.dwNumberOfProcessors as i32
}
