use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;
use std::ptr;

/// Create a socket with close-on-exec set and the requested blocking mode.
pub(crate) fn new_socket(domain: libc::c_int, socket_type: libc::c_int, blocking: bool) -> io::Result<RawFd> {
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    let fd = {
        let mut flags = socket_type | libc::SOCK_CLOEXEC;
        if !blocking {
            flags |= libc::SOCK_NONBLOCK;
        }
        syscall!(socket(domain, flags, 0))?
    };

    // Darwin and friends lack SOCK_NONBLOCK/SOCK_CLOEXEC, so additional
    // `fcntl` calls are needed after creation.
    #[cfg(not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    )))]
    let fd = {
        let fd = syscall!(socket(domain, socket_type, 0))?;
        if let Err(err) = super::set_cloexec(fd).and_then(|()| super::set_blocking_mode(fd, blocking))
        {
            super::close_quietly(fd);
            return Err(err);
        }
        fd
    };

    Ok(fd)
}

/// A `sockaddr` large enough for either inet family, passable to the OS.
#[repr(C)]
pub(crate) union SocketAddrCRepr {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
}

impl SocketAddrCRepr {
    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        self as *const SocketAddrCRepr as *const libc::sockaddr
    }
}

/// Convert a standard socket address into its system representation.
pub(crate) fn socket_addr(addr: &SocketAddr) -> (SocketAddrCRepr, libc::socklen_t) {
    match addr {
        SocketAddr::V4(addr) => {
            let sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.ip().octets()),
            };

            let sockaddr_in = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: addr.port().to_be(),
                sin_addr,
                sin_zero: [0; 8],
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd",
                ))]
                sin_len: 0,
            };

            let sockaddr = SocketAddrCRepr { v4: sockaddr_in };
            (sockaddr, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(addr) => {
            let sockaddr_in6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: addr.port().to_be(),
                sin6_addr: libc::in6_addr {
                    s6_addr: addr.ip().octets(),
                },
                sin6_flowinfo: addr.flowinfo(),
                sin6_scope_id: addr.scope_id(),
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd",
                ))]
                sin6_len: 0,
            };

            let sockaddr = SocketAddrCRepr { v6: sockaddr_in6 };
            (sockaddr, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

/// Convert a filled `sockaddr_storage` back into a standard address.
///
/// # Safety
///
/// `storage` must point at a `sockaddr_in` or `sockaddr_in6` written by the
/// OS.
pub(crate) unsafe fn to_socket_addr(storage: *const libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match (*storage).ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in = &*(storage as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 = &*(storage as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::ErrorKind::InvalidInput.into()),
    }
}

/// Get the `sun_path` field offset of `sockaddr_un` for the target OS.
///
/// Some implementations include fields before `sun_path`, so the expression
/// more portably describes the size of the address structure than
/// `size_of::<sa_family_t>()` would.
fn path_offset(sockaddr: &libc::sockaddr_un) -> usize {
    let base = sockaddr as *const _ as usize;
    let path = &sockaddr.sun_path as *const _ as usize;
    path - base
}

/// Build a `sockaddr_un` from raw name bytes.
///
/// A leading NUL byte selects the abstract namespace (Linux only). The
/// returned length covers only the used portion of `sun_path`.
pub(crate) fn unix_addr(name: &[u8]) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut sockaddr = unsafe { mem::zeroed::<libc::sockaddr_un>() };
    sockaddr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    if name.len() >= sockaddr.sun_path.len() {
        return Err(io::ErrorKind::InvalidInput.into());
    }

    // SAFETY: `name` fits in `sun_path` per the check above, and the
    // buffers do not overlap.
    unsafe {
        ptr::copy_nonoverlapping(
            name.as_ptr(),
            sockaddr.sun_path.as_mut_ptr() as *mut u8,
            name.len(),
        )
    };

    let mut addrlen = path_offset(&sockaddr) + name.len();
    // +1 for the terminating NUL of a filesystem path. Abstract names start
    // with NUL and take no terminator.
    match name.first() {
        Some(&0) | None => {}
        Some(_) => addrlen += 1,
    }

    Ok((sockaddr, addrlen as libc::socklen_t))
}

/// Read the name bytes back out of a `sockaddr_un`.
pub(crate) fn unix_addr_bytes(sockaddr: &libc::sockaddr_un, addrlen: libc::socklen_t) -> &[u8] {
    let offset = path_offset(sockaddr);
    let len = (addrlen as usize).saturating_sub(offset);
    // SAFETY: `sun_path` is a c_char array; reinterpreting as bytes is fine.
    let path = unsafe { &*(&sockaddr.sun_path as *const [libc::c_char] as *const [u8]) };
    let mut name = &path[..len.min(path.len())];
    // Drop the trailing NUL of a filesystem path.
    if let [head @ .., 0] = name {
        if name.first() != Some(&0) {
            name = head;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inet_round_trip() {
        let addr: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        let (repr, len) = socket_addr(&addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());

        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        unsafe {
            ptr::copy_nonoverlapping(
                repr.as_ptr() as *const u8,
                &mut storage as *mut _ as *mut u8,
                len as usize,
            );
        }
        let back = unsafe { to_socket_addr(&storage) }.unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn inet6_round_trip() {
        let addr: SocketAddr = "[::1]:9000".parse().unwrap();
        let (repr, len) = socket_addr(&addr);

        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        unsafe {
            ptr::copy_nonoverlapping(
                repr.as_ptr() as *const u8,
                &mut storage as *mut _ as *mut u8,
                len as usize,
            );
        }
        let back = unsafe { to_socket_addr(&storage) }.unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn unix_addr_lengths() {
        let (addr, len) = unix_addr(b"/tmp/sock").unwrap();
        assert_eq!(len as usize, path_offset(&addr) + b"/tmp/sock".len() + 1);
        assert_eq!(unix_addr_bytes(&addr, len), b"/tmp/sock");

        let (addr, len) = unix_addr(b"\0abstract").unwrap();
        assert_eq!(len as usize, path_offset(&addr) + b"\0abstract".len());
        assert_eq!(unix_addr_bytes(&addr, len), b"\0abstract");
    }

    #[test]
    fn unix_addr_too_long() {
        let name = [b'a'; 200];
        assert!(unix_addr(&name).is_err());
    }
}
