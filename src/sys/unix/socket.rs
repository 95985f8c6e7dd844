use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use log::trace;

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::peer_address::SocketAddrKind;

const LISTEN_BACKLOG: libc::c_int = 128;

/// Shared plumbing for every socket backed connector kind: inet stream and
/// datagram, and local domain sockets.
#[derive(Debug)]
pub(crate) struct SysSocket {
    fd: RawFd,
    server: bool,
    connected: bool,
}

fn domain_for(addr: &SocketAddrKind) -> Result<libc::c_int> {
    match addr {
        SocketAddrKind::Inet(a) if a.is_ipv4() => Ok(libc::AF_INET),
        SocketAddrKind::Inet(_) => Ok(libc::AF_INET6),
        SocketAddrKind::Local(_) => Ok(libc::AF_UNIX),
        SocketAddrKind::Unspec => Err(Error::InvalidValue),
    }
}

/// Produce the system representation of `addr` and hand it to `f`.
fn with_sockaddr<T>(
    addr: &SocketAddrKind,
    f: impl FnOnce(*const libc::sockaddr, libc::socklen_t) -> T,
) -> Result<T> {
    match addr {
        SocketAddrKind::Inet(inet) => {
            let (repr, len) = super::net::socket_addr(inet);
            Ok(f(repr.as_ptr(), len))
        }
        SocketAddrKind::Local(name) => {
            let (repr, len) = super::net::unix_addr(name)?;
            Ok(f(&repr as *const _ as *const libc::sockaddr, len))
        }
        SocketAddrKind::Unspec => Err(Error::InvalidValue),
    }
}

/// Read a peer or local address back out of OS storage.
fn from_storage(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> SocketAddrKind {
    match storage.ss_family as libc::c_int {
        libc::AF_INET | libc::AF_INET6 => {
            match unsafe { super::net::to_socket_addr(storage) } {
                Ok(addr) => SocketAddrKind::Inet(addr),
                Err(_) => SocketAddrKind::Unspec,
            }
        }
        libc::AF_UNIX => {
            let sockaddr = unsafe { &*(storage as *const _ as *const libc::sockaddr_un) };
            let name = super::net::unix_addr_bytes(sockaddr, len);
            if name.is_empty() {
                SocketAddrKind::Unspec
            } else {
                SocketAddrKind::Local(name.to_vec())
            }
        }
        _ => SocketAddrKind::Unspec,
    }
}

impl SysSocket {
    pub(crate) fn new() -> SysSocket {
        SysSocket {
            fd: -1,
            server: false,
            connected: false,
        }
    }

    fn from_fd(fd: RawFd, connected: bool) -> SysSocket {
        SysSocket {
            fd,
            server: false,
            connected,
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        if self.fd < 0 {
            Handle::invalid()
        } else {
            Handle::new(self.fd)
        }
    }

    pub(crate) fn listening(&self) -> bool {
        self.fd >= 0 && self.server
    }

    pub(crate) fn connected(&self) -> bool {
        self.fd >= 0 && self.connected
    }

    fn socket_type(stream: bool) -> libc::c_int {
        if stream {
            libc::SOCK_STREAM
        } else {
            libc::SOCK_DGRAM
        }
    }

    /// Create the socket and bind it; stream sockets also start listening.
    pub(crate) fn bind(
        &mut self,
        addr: &SocketAddrKind,
        stream: bool,
        blocking: bool,
    ) -> Result<()> {
        if self.fd >= 0 {
            return Err(Error::Initialization);
        }

        let domain = domain_for(addr)?;
        let fd = super::net::new_socket(domain, SysSocket::socket_type(stream), blocking)?;

        let res = with_sockaddr(addr, |sockaddr, len| syscall!(bind(fd, sockaddr, len)))
            .and_then(|r| r.map_err(Error::from).map(|_| ()));
        if let Err(err) = res {
            super::close_quietly(fd);
            return Err(err);
        }

        if stream {
            if let Err(err) = syscall!(listen(fd, LISTEN_BACKLOG)) {
                super::close_quietly(fd);
                return Err(err.into());
            }
        }

        trace!("socket {} bound, listening={}", fd, stream);
        self.fd = fd;
        self.server = true;
        Ok(())
    }

    /// Create the socket and connect it.
    ///
    /// A non-blocking connect that cannot complete immediately stores the
    /// descriptor and returns [`Error::Async`]; readiness on the write
    /// handle signals completion. Non-blocking sockets return `Async` even
    /// on immediate success so callers can treat every kind the same.
    pub(crate) fn connect(
        &mut self,
        addr: &SocketAddrKind,
        stream: bool,
        blocking: bool,
    ) -> Result<()> {
        if self.fd >= 0 {
            return Err(Error::Initialization);
        }

        let domain = domain_for(addr)?;
        let fd = super::net::new_socket(domain, SysSocket::socket_type(stream), blocking)?;

        loop {
            let res =
                with_sockaddr(addr, |sockaddr, len| syscall!(connect(fd, sockaddr, len)))?;
            match res {
                Ok(_) => {
                    self.fd = fd;
                    self.connected = true;
                    if !blocking {
                        return Err(Error::Async);
                    }
                    return Ok(());
                }
                Err(ref err)
                    if err.raw_os_error() == Some(libc::EINPROGRESS)
                        || err.raw_os_error() == Some(libc::EALREADY) =>
                {
                    self.fd = fd;
                    self.connected = true;
                    return Err(Error::Async);
                }
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => {
                    super::close_quietly(fd);
                    return Err(err.into());
                }
            }
        }
    }

    /// Accept a pending connection on a listening stream socket.
    pub(crate) fn accept(&mut self, blocking: bool) -> Result<(SysSocket, SocketAddrKind)> {
        if !self.listening() {
            return Err(Error::Initialization);
        }

        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let fd = loop {
            match syscall!(accept(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )) {
                Ok(fd) => break fd,
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        };

        if let Err(err) = super::set_cloexec(fd).and_then(|()| super::set_blocking_mode(fd, blocking))
        {
            super::close_quietly(fd);
            return Err(err.into());
        }

        let peer = from_storage(&storage, len);
        Ok((SysSocket::from_fd(fd, true), peer))
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_fd(self.fd, buf)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        write_fd(self.fd, buf)
    }

    pub(crate) fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrKind)> {
        let mut storage = unsafe { mem::zeroed::<libc::sockaddr_storage>() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let amount = loop {
            match syscall!(recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )) {
                Ok(n) => break n,
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        };

        Ok((amount as usize, from_storage(&storage, len)))
    }

    pub(crate) fn send_to(&mut self, buf: &[u8], to: &SocketAddrKind) -> Result<usize> {
        loop {
            let res = with_sockaddr(to, |sockaddr, len| {
                syscall!(sendto(
                    self.fd,
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                    sockaddr,
                    len,
                ))
            })?;
            match res {
                Ok(n) => return Ok(n as usize),
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub(crate) fn peek(&self) -> Result<usize> {
        Ok(super::bytes_available(self.fd)?)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Err(Error::Initialization);
        }
        trace!("closing socket {}", self.fd);
        super::close_quietly(self.fd);
        self.fd = -1;
        self.server = false;
        self.connected = false;
        Ok(())
    }
}

impl Drop for SysSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            super::close_quietly(self.fd);
        }
    }
}

/// Read from a descriptor, retrying on signal interrupts.
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    if fd < 0 {
        return Err(Error::Initialization);
    }
    loop {
        match syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())) {
            Ok(n) => return Ok(n as usize),
            Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Err(Error::Async),
            Err(err) => return Err(err.into()),
        }
    }
}

/// Write to a descriptor, retrying on signal interrupts. Partial writes
/// return the short count.
pub(crate) fn write_fd(fd: RawFd, buf: &[u8]) -> Result<usize> {
    if fd < 0 {
        return Err(Error::Initialization);
    }
    loop {
        match syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len())) {
            Ok(n) => return Ok(n as usize),
            Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Err(Error::Async),
            Err(err) => return Err(err.into()),
        }
    }
}
