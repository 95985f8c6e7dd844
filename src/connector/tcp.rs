//! TCP stream connectors.

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
pub(crate) struct ConnectorTcp {
    sock: SysSocket,
    addr: SocketAddrKind,
    options: Options,
}

impl ConnectorTcp {
    pub(crate) fn new(addr: SocketAddrKind, options: Options) -> ConnectorTcp {
        ConnectorTcp {
            sock: SysSocket::new(),
            addr,
            options,
        }
    }

    fn from_accepted(sock: SysSocket, options: Options) -> ConnectorTcp {
        ConnectorTcp {
            sock,
            addr: SocketAddrKind::Unspec,
            options,
        }
    }

    fn blocking(&self) -> bool {
        self.options.contains(Options::BLOCKING)
    }
}

impl ConnectorImpl for ConnectorTcp {
    fn listen(&mut self) -> Result<()> {
        self.sock.bind(&self.addr, true, self.blocking())
    }

    fn listening(&self) -> bool {
        self.sock.listening()
    }

    fn connect(&mut self) -> Result<()> {
        self.sock.connect(&self.addr, true, self.blocking())
    }

    fn connected(&self) -> bool {
        self.sock.connected()
    }

    fn accept(&mut self) -> Result<AcceptResult> {
        let (sock, peer) = self.sock.accept(self.blocking())?;
        let imp = ConnectorTcp::from_accepted(sock, self.options);
        Ok(AcceptResult::New(Box::new(imp), peer))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.sock.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.sock.write(buf)
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
