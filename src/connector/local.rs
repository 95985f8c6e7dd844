//! Local (UNIX domain) connectors, stream or datagram.
//!
//! The listening side owns the filesystem entry and unlinks it on close.
//! Abstract names (leading NUL, Linux only) have no filesystem entry to
//! clean up.

use std::sync::Arc;

use log::warn;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{self, Options};
use crate::peer_address::{PeerAddress, SocketAddrKind};
use crate::registry::ConnectorInfo;
use crate::url::Url;

use super::{AcceptResult, ConnectorImpl, ConnectorType};

#[cfg(unix)]
use crate::sys::unix::socket::SysSocket;
#[cfg(windows)]
use crate::sys::windows::socket::SysSocket;

pub(crate) fn factory(
    api: &Arc<Api>,
    url: &Url,
    _conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    let address = PeerAddress::new(api, url)?;
    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;
    Ok(Box::new(ConnectorLocal::new(
        address.socket_addr().clone(),
        opts,
    )))
}

#[derive(Debug)]
pub(crate) struct ConnectorLocal {
    sock: SysSocket,
    addr: SocketAddrKind,
    options: Options,
    owner: bool,
}

impl ConnectorLocal {
    pub(crate) fn new(addr: SocketAddrKind, options: Options) -> ConnectorLocal {
        ConnectorLocal {
            sock: SysSocket::new(),
            addr,
            options,
            owner: false,
        }
    }

    fn from_accepted(sock: SysSocket, options: Options) -> ConnectorLocal {
        ConnectorLocal {
            sock,
            addr: SocketAddrKind::Unspec,
            options,
            owner: false,
        }
    }

    fn blocking(&self) -> bool {
        self.options.contains(Options::BLOCKING)
    }

    fn stream(&self) -> bool {
        self.options.contains(Options::STREAM)
    }

    /// A filesystem name to unlink, if this connector created one.
    fn owned_path(&self) -> Option<&[u8]> {
        if !self.owner {
            return None;
        }
        match self.addr.local_name() {
            // Abstract names have no filesystem entry.
            Some(name) if name.first() != Some(&0) => Some(name),
            _ => None,
        }
    }

    fn unlink_owned(&mut self) {
        #[cfg(unix)]
        if let Some(path) = self.owned_path() {
            if let Ok(cpath) = std::ffi::CString::new(path) {
                if let Err(err) = syscall!(unlink(cpath.as_ptr())) {
                    warn!("could not remove socket file: {}", err);
                }
            }
        }
        self.owner = false;
    }
}

impl ConnectorImpl for ConnectorLocal {
    fn listen(&mut self) -> Result<()> {
        if self.addr.is_unspec() {
            return Err(Error::InvalidValue);
        }
        self.sock.bind(&self.addr, self.stream(), self.blocking())?;
        self.owner = true;
        Ok(())
    }

    fn listening(&self) -> bool {
        self.sock.listening()
    }

    fn connect(&mut self) -> Result<()> {
        if self.addr.is_unspec() {
            return Err(Error::InvalidValue);
        }
        self.sock.connect(&self.addr, self.stream(), self.blocking())
    }

    fn connected(&self) -> bool {
        self.sock.connected()
    }

    fn accept(&mut self) -> Result<AcceptResult> {
        if !self.stream() {
            // Datagram endpoints have no per-peer connection to hand out.
            return Ok(AcceptResult::Shared);
        }
        let (sock, peer) = self.sock.accept(self.blocking())?;
        let imp = ConnectorLocal::from_accepted(sock, self.options);
        Ok(AcceptResult::New(Box::new(imp), peer))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.sock.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.sock.write(buf)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrKind)> {
        if self.stream() {
            return Err(Error::UnsupportedAction);
        }
        self.sock.recv_from(buf)
    }

    fn send(&mut self, buf: &[u8], to: &SocketAddrKind) -> Result<usize> {
        if self.stream() {
            return Err(Error::UnsupportedAction);
        }
        self.sock.send_to(buf, to)
    }

    fn peek(&self) -> Result<usize> {
        if !self.connected() && !self.listening() {
            return Err(Error::Initialization);
        }
        self.sock.peek()
    }

    fn close(&mut self) -> Result<()> {
        self.sock.close()?;
        self.unlink_owned();
        Ok(())
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

impl Drop for ConnectorLocal {
    fn drop(&mut self) {
        self.unlink_owned();
    }
}
