use std::io;
use std::os::unix::io::RawFd;

/// Create a pipe, returning `[read, write]` descriptors with close-on-exec
/// set and the requested blocking mode.
pub(crate) fn new_raw(blocking: bool) -> io::Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1, -1];

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    {
        let mut flags = libc::O_CLOEXEC;
        if !blocking {
            flags |= libc::O_NONBLOCK;
        }
        syscall!(pipe2(fds.as_mut_ptr(), flags))?;
    }

    #[cfg(not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    )))]
    {
        syscall!(pipe(fds.as_mut_ptr()))?;
        for fd in &fds {
            if let Err(err) = super::set_cloexec(*fd)
                .and_then(|()| super::set_blocking_mode(*fd, blocking))
            {
                super::close_quietly(fds[0]);
                super::close_quietly(fds[1]);
                return Err(err);
            }
        }
    }

    Ok(fds)
}
