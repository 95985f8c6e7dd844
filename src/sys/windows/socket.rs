//! Winsock counterpart of the POSIX socket plumbing.
//!
//! Sockets on Windows go through the select thread for readiness rather
//! than the completion port, so plain (non-overlapped) winsock calls with
//! `FIONBIO` for non-blocking mode are all that is needed here.

use std::mem;

use log::trace;

use windows_sys::Win32::Networking::WinSock::{
    accept, bind, closesocket, connect, ioctlsocket, listen, recv, recvfrom, send, sendto, socket,
    ADDRESS_FAMILY, AF_INET, AF_INET6, FIONBIO, FIONREAD, INVALID_SOCKET, SOCKADDR,
    SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR, SOCK_DGRAM, SOCK_STREAM,
};

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::peer_address::SocketAddrKind;

use super::last_socket_error;

const LISTEN_BACKLOG: i32 = 128;

#[derive(Debug)]
pub(crate) struct SysSocket {
    handle: Handle,
    server: bool,
    connected: bool,
}

fn family_for(addr: &SocketAddrKind) -> Result<ADDRESS_FAMILY> {
    match addr {
        SocketAddrKind::Inet(a) if a.is_ipv4() => Ok(AF_INET),
        SocketAddrKind::Inet(_) => Ok(AF_INET6),
        // AF_UNIX exists on recent Windows, but local connectors route
        // through the same inet-style calls with sockaddr_un.
        SocketAddrKind::Local(_) => Ok(1 as ADDRESS_FAMILY),
        SocketAddrKind::Unspec => Err(Error::InvalidValue),
    }
}

/// `SOCKADDR_STORAGE` plus the used length, built from a peer address.
fn sockaddr_from(addr: &SocketAddrKind) -> Result<(SOCKADDR_STORAGE, i32)> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    match addr {
        SocketAddrKind::Inet(inet) => {
            let len = match inet {
                std::net::SocketAddr::V4(v4) => {
                    let sin = windows_sys::Win32::Networking::WinSock::SOCKADDR_IN {
                        sin_family: AF_INET,
                        sin_port: v4.port().to_be(),
                        sin_addr: unsafe { mem::transmute(u32::from_ne_bytes(v4.ip().octets())) },
                        sin_zero: [0; 8],
                    };
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            &sin as *const _ as *const u8,
                            &mut storage as *mut _ as *mut u8,
                            mem::size_of_val(&sin),
                        )
                    };
                    mem::size_of_val(&sin)
                }
                std::net::SocketAddr::V6(v6) => {
                    let mut sin6: windows_sys::Win32::Networking::WinSock::SOCKADDR_IN6 =
                        unsafe { mem::zeroed() };
                    sin6.sin6_family = AF_INET6;
                    sin6.sin6_port = v6.port().to_be();
                    sin6.sin6_addr = unsafe { mem::transmute(v6.ip().octets()) };
                    sin6.sin6_flowinfo = v6.flowinfo();
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            &sin6 as *const _ as *const u8,
                            &mut storage as *mut _ as *mut u8,
                            mem::size_of_val(&sin6),
                        )
                    };
                    mem::size_of_val(&sin6)
                }
            };
            Ok((storage, len as i32))
        }
        SocketAddrKind::Local(name) => {
            // sockaddr_un layout: family word followed by the path.
            let bytes = &mut unsafe {
                std::slice::from_raw_parts_mut(
                    &mut storage as *mut _ as *mut u8,
                    mem::size_of::<SOCKADDR_STORAGE>(),
                )
            };
            if name.len() + 3 > bytes.len() {
                return Err(Error::InvalidValue);
            }
            bytes[0] = 1; // AF_UNIX
            bytes[1] = 0;
            bytes[2..2 + name.len()].copy_from_slice(name);
            Ok((storage, (2 + name.len() + 1) as i32))
        }
        SocketAddrKind::Unspec => Err(Error::InvalidValue),
    }
}

fn sockaddr_to_kind(storage: &SOCKADDR_STORAGE, len: i32) -> SocketAddrKind {
    match storage.ss_family {
        AF_INET => {
            let sin: &windows_sys::Win32::Networking::WinSock::SOCKADDR_IN =
                unsafe { &*(storage as *const _ as *const _) };
            let ip_bits: u32 = unsafe { mem::transmute_copy(&sin.sin_addr) };
            let ip = std::net::Ipv4Addr::from(ip_bits.to_ne_bytes());
            SocketAddrKind::Inet(std::net::SocketAddr::new(
                ip.into(),
                u16::from_be(sin.sin_port),
            ))
        }
        AF_INET6 => {
            let sin6: &windows_sys::Win32::Networking::WinSock::SOCKADDR_IN6 =
                unsafe { &*(storage as *const _ as *const _) };
            let octets: [u8; 16] = unsafe { mem::transmute_copy(&sin6.sin6_addr) };
            SocketAddrKind::Inet(std::net::SocketAddr::new(
                std::net::Ipv6Addr::from(octets).into(),
                u16::from_be(sin6.sin6_port),
            ))
        }
        1 => {
            let bytes = unsafe {
                std::slice::from_raw_parts(storage as *const _ as *const u8, len.max(0) as usize)
            };
            let name = bytes.get(2..).unwrap_or(&[]);
            let name = match name.iter().position(|&b| b == 0) {
                Some(0) | None => name,
                Some(end) => &name[..end],
            };
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
            handle: Handle::invalid(),
            server: false,
            connected: false,
        }
    }

    fn from_socket(sock: SOCKET, blocking: bool, connected: bool) -> SysSocket {
        SysSocket {
            handle: Handle::from_socket(sock, blocking),
            server: false,
            connected,
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle.clone()
    }

    fn raw(&self) -> Result<SOCKET> {
        match self.handle.raw() {
            Some(super::RawResource::Socket(s)) if s != INVALID_SOCKET => Ok(s),
            _ => Err(Error::Initialization),
        }
    }

    pub(crate) fn listening(&self) -> bool {
        self.handle.valid() && self.server
    }

    pub(crate) fn connected(&self) -> bool {
        self.handle.valid() && self.connected
    }

    fn create(addr: &SocketAddrKind, stream: bool, blocking: bool) -> Result<SOCKET> {
        let family = family_for(addr)?;
        let sock_type = if stream { SOCK_STREAM } else { SOCK_DGRAM };
        let sock = unsafe { socket(family as i32, sock_type, 0) };
        if sock == INVALID_SOCKET {
            return Err(last_socket_error());
        }

        let mut nonblocking: u32 = if blocking { 0 } else { 1 };
        if unsafe { ioctlsocket(sock, FIONBIO, &mut nonblocking) } == SOCKET_ERROR {
            let err = last_socket_error();
            unsafe { closesocket(sock) };
            return Err(err);
        }
        Ok(sock)
    }

    pub(crate) fn bind(
        &mut self,
        addr: &SocketAddrKind,
        stream: bool,
        blocking: bool,
    ) -> Result<()> {
        if self.handle.valid() {
            return Err(Error::Initialization);
        }

        let sock = SysSocket::create(addr, stream, blocking)?;
        let (storage, len) = sockaddr_from(addr)?;
        if unsafe { bind(sock, &storage as *const _ as *const SOCKADDR, len) } == SOCKET_ERROR {
            let err = last_socket_error();
            unsafe { closesocket(sock) };
            return Err(err);
        }
        if stream && unsafe { listen(sock, LISTEN_BACKLOG) } == SOCKET_ERROR {
            let err = last_socket_error();
            unsafe { closesocket(sock) };
            return Err(err);
        }

        trace!("socket {} bound, listening={}", sock, stream);
        self.handle = Handle::from_socket(sock, blocking);
        self.server = true;
        Ok(())
    }

    pub(crate) fn connect(
        &mut self,
        addr: &SocketAddrKind,
        stream: bool,
        blocking: bool,
    ) -> Result<()> {
        if self.handle.valid() {
            return Err(Error::Initialization);
        }

        let sock = SysSocket::create(addr, stream, blocking)?;
        let (storage, len) = sockaddr_from(addr)?;
        let res = unsafe { connect(sock, &storage as *const _ as *const SOCKADDR, len) };
        if res == SOCKET_ERROR {
            let err = last_socket_error();
            if err != Error::Async {
                unsafe { closesocket(sock) };
                return Err(err);
            }
            self.handle = Handle::from_socket(sock, blocking);
            self.connected = true;
            return Err(Error::Async);
        }

        self.handle = Handle::from_socket(sock, blocking);
        self.connected = true;
        if !blocking {
            return Err(Error::Async);
        }
        Ok(())
    }

    pub(crate) fn accept(&mut self, blocking: bool) -> Result<(SysSocket, SocketAddrKind)> {
        let raw = self.raw()?;
        if !self.server {
            return Err(Error::Initialization);
        }

        let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
        let sock = unsafe { accept(raw, &mut storage as *mut _ as *mut SOCKADDR, &mut len) };
        if sock == INVALID_SOCKET {
            return Err(last_socket_error());
        }

        let mut nonblocking: u32 = if blocking { 0 } else { 1 };
        if unsafe { ioctlsocket(sock, FIONBIO, &mut nonblocking) } == SOCKET_ERROR {
            let err = last_socket_error();
            unsafe { closesocket(sock) };
            return Err(err);
        }

        let peer = sockaddr_to_kind(&storage, len);
        Ok((SysSocket::from_socket(sock, blocking, true), peer))
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let raw = self.raw()?;
        let n = unsafe { recv(raw, buf.as_mut_ptr(), buf.len() as i32, 0) };
        if n == SOCKET_ERROR {
            return Err(last_socket_error());
        }
        Ok(n as usize)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let raw = self.raw()?;
        let n = unsafe { send(raw, buf.as_ptr(), buf.len() as i32, 0) };
        if n == SOCKET_ERROR {
            return Err(last_socket_error());
        }
        Ok(n as usize)
    }

    pub(crate) fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrKind)> {
        let raw = self.raw()?;
        let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;
        let n = unsafe {
            recvfrom(
                raw,
                buf.as_mut_ptr(),
                buf.len() as i32,
                0,
                &mut storage as *mut _ as *mut SOCKADDR,
                &mut len,
            )
        };
        if n == SOCKET_ERROR {
            return Err(last_socket_error());
        }
        Ok((n as usize, sockaddr_to_kind(&storage, len)))
    }

    pub(crate) fn send_to(&mut self, buf: &[u8], to: &SocketAddrKind) -> Result<usize> {
        let raw = self.raw()?;
        let (storage, len) = sockaddr_from(to)?;
        let n = unsafe {
            sendto(
                raw,
                buf.as_ptr(),
                buf.len() as i32,
                0,
                &storage as *const _ as *const SOCKADDR,
                len,
            )
        };
        if n == SOCKET_ERROR {
            return Err(last_socket_error());
        }
        Ok(n as usize)
    }

    pub(crate) fn peek(&self) -> Result<usize> {
        let raw = self.raw()?;
        let mut available: u32 = 0;
        if unsafe { ioctlsocket(raw, FIONREAD as i32, &mut available) } == SOCKET_ERROR {
            return Err(last_socket_error());
        }
        Ok(available as usize)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if !self.handle.valid() {
            return Err(Error::Initialization);
        }
        // Dropping the last handle clone closes the socket.
        self.handle = Handle::invalid();
        self.server = false;
        self.connected = false;
        Ok(())
    }
}
