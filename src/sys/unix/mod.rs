pub(crate) mod net;
pub(crate) mod pipe;
pub(crate) mod selector;
pub(crate) mod socket;

use std::io;
use std::os::unix::io::RawFd;

/// Switch `O_NONBLOCK` on or off for a descriptor.
pub(crate) fn set_blocking_mode(fd: RawFd, blocking: bool) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    let desired = if blocking {
        flags & !libc::O_NONBLOCK
    } else {
        flags | libc::O_NONBLOCK
    };
    if desired != flags {
        syscall!(fcntl(fd, libc::F_SETFL, desired))?;
    }
    Ok(())
}

pub(crate) fn get_blocking_mode(fd: RawFd) -> io::Result<bool> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    Ok(flags & libc::O_NONBLOCK == 0)
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFD))?;
    if flags & libc::FD_CLOEXEC == 0 {
        syscall!(fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
    }
    Ok(())
}

/// Close a descriptor, ignoring errors. Used on cleanup paths only.
pub(crate) fn close_quietly(fd: RawFd) {
    if fd >= 0 {
        let _ = syscall!(close(fd));
    }
}

/// Bytes readable without consuming them.
pub(crate) fn bytes_available(fd: RawFd) -> io::Result<usize> {
    let mut available: libc::c_int = 0;
    syscall!(ioctl(fd, libc::FIONREAD, &mut available))?;
    Ok(available as usize)
}
