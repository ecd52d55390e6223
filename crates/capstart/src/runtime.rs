//! Platform plumbing for descriptors, capability mode and `fexecve`.
//!
//! Capsicum calls are only linked on FreeBSD. Elsewhere capability mode is
//! reported as unsupported, which makes every launch fail closed.

use std::convert::Infallible;
use std::ffi::{CString, c_char};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr;

use crate::rights::Rights;

/// Attaches `rights` to `fd`.
#[cfg(target_os = "freebsd")]
pub(crate) fn limit_rights(fd: BorrowedFd<'_>, rights: &Rights) -> io::Result<()> {
    const _: () = assert!(
        std::mem::size_of::<libc::cap_rights_t>() == std::mem::size_of::<[u64; 2]>()
    );
    // SAFETY: `cap_rights_t` is `#[repr(C)]` around the same two version-0
    // words that `Rights::words` produces.
    let raw: libc::cap_rights_t = unsafe { std::mem::transmute(rights.words()) };
    // SAFETY: `fd` is a live descriptor and `raw` outlives the call.
    let status = unsafe { libc::cap_rights_limit(fd.as_raw_fd(), &raw) };
    if status == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Records nothing at the OS level; see [`crate::rights::limit`].
#[cfg(not(target_os = "freebsd"))]
pub(crate) fn limit_rights(fd: BorrowedFd<'_>, rights: &Rights) -> io::Result<()> {
    let _ = (fd, rights);
    Ok(())
}

/// Irrevocably enters capability mode for the whole process.
#[cfg(target_os = "freebsd")]
pub(crate) fn enter_capability_mode() -> io::Result<()> {
    // SAFETY: `cap_enter` takes no arguments and only changes process state.
    let status = unsafe { libc::cap_enter() };
    if status == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Capability mode does not exist on this host.
#[cfg(not(target_os = "freebsd"))]
pub(crate) fn enter_capability_mode() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "capability mode is not available on this platform",
    ))
}

/// Clears `FD_CLOEXEC` so `fd` survives into the loader.
pub(crate) fn clear_close_on_exec(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: F_GETFD/F_SETFD only inspect and update descriptor flags.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    let status = unsafe { libc::fcntl(raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
    if status < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Replaces the process image with the program behind `fd`.
///
/// Only returns when the kernel refused the exec.
pub(crate) fn fexecve(
    fd: BorrowedFd<'_>,
    argv: &[CString],
    envp: &[CString],
) -> io::Result<Infallible> {
    let argv_ptrs = null_terminated(argv);
    let envp_ptrs = null_terminated(envp);
    // SAFETY: both pointer arrays are NUL-terminated and borrow from slices
    // that live until the call returns.
    unsafe { libc::fexecve(fd.as_raw_fd(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };
    Err(io::Error::last_os_error())
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|value| value.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}
