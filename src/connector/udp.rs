//! UDP datagram connectors.
//!
//! `listen` binds the socket, which is all a datagram endpoint needs to
//! communicate; `accept` returns a connector sharing the server's state.
//! `connect` pins a default peer so `read`/`write` work connection style.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::Options;
use crate::peer_address::SocketAddrKind;

use super::{AcceptResult, ConnectorImpl};

#[cfg(unix)]
use crate::sys::unix::socket::SysSocket;
#[cfg(windows)]
use crate::sys::windows::socket::SysSocket;

#[derive(Debug)]
pub(crate) struct ConnectorUdp {
    sock: SysSocket,
    addr: SocketAddrKind,
    options: Options,
}

impl ConnectorUdp {
    pub(crate) fn new(addr: SocketAddrKind, options: Options) -> ConnectorUdp {
        ConnectorUdp {
            sock: SysSocket::new(),
            addr,
            options,
        }
    }

    fn blocking(&self) -> bool {
        self.options.contains(Options::BLOCKING)
    }
}

impl ConnectorImpl for ConnectorUdp {
    fn listen(&mut self) -> Result<()> {
        self.sock.bind(&self.addr, false, self.blocking())
    }

    fn listening(&self) -> bool {
        self.sock.listening()
    }

    fn connect(&mut self) -> Result<()> {
        self.sock.connect(&self.addr, false, self.blocking())
    }

    fn connected(&self) -> bool {
        self.sock.connected()
    }

    fn accept(&mut self) -> Result<AcceptResult> {
        Ok(AcceptResult::Shared)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.sock.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.sock.write(buf)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrKind)> {
        self.sock.recv_from(buf)
    }

    fn send(&mut self, buf: &[u8], to: &SocketAddrKind) -> Result<usize> {
        self.sock.send_to(buf, to)
    }

    fn peek(&self) -> Result<usize> {
        if !self.connected() && !self.listening() {
            return Err(Error::Initialization);
        }
        self.sock.peek()
    }

    fn close(&mut self) -> Result<()> {
        self.sock.close()
    }

    fn get_read_handle(&self) -> Handle {
        self.sock.handle()
    }

    fn get_write_handle(&self) -> Handle {
        self.sock.handle()
    }

    fn get_options(&self) -> Options {
        self.options
    }
}
