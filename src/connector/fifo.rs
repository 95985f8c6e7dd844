//! FIFO (named pipe) connectors, POSIX only.
//!
//! The listening side creates the FIFO and owns the filesystem entry.
//! Both sides open read-write; opening a FIFO read-write never blocks
//! waiting for a peer, and keeps the read end alive across writer churn.
//! Multiple readers each see a subset of writes, which is inherent to the
//! primitive.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use log::warn;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{self, Options};
use crate::peer_address::{PeerAddress, SocketAddrKind};
use crate::registry::ConnectorInfo;
use crate::sys::unix;
use crate::url::Url;

use super::{AcceptResult, ConnectorImpl, ConnectorType};

pub(crate) fn factory(
    api: &Arc<Api>,
    url: &Url,
    _conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    if url.path.is_empty() {
        return Err(Error::Format);
    }
    let address = PeerAddress::new(api, url)?;
    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;
    Ok(Box::new(ConnectorFifo::new(
        address.socket_addr().clone(),
        opts,
    )))
}

#[derive(Debug)]
pub(crate) struct ConnectorFifo {
    fd: RawFd,
    addr: SocketAddrKind,
    options: Options,
    server: bool,
}

impl ConnectorFifo {
    pub(crate) fn new(addr: SocketAddrKind, options: Options) -> ConnectorFifo {
        ConnectorFifo {
            fd: -1,
            addr,
            options,
            server: false,
        }
    }

    fn path(&self) -> Result<CString> {
        let name = self.addr.local_name().ok_or(Error::InvalidValue)?;
        CString::new(name).map_err(|_| Error::InvalidValue)
    }

    fn open_fifo(&mut self) -> Result<()> {
        let path = self.path()?;

        let mut mode = libc::O_RDWR | libc::O_CLOEXEC;
        if !self.options.contains(Options::BLOCKING) {
            mode |= libc::O_NONBLOCK;
        }

        loop {
            match syscall!(open(path.as_ptr(), mode)) {
                Ok(fd) => {
                    self.fd = fd;
                    return Ok(());
                }
                Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(ref err) if err.raw_os_error() == Some(libc::ENXIO) => {
                    return Err(Error::NoConnection)
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn unlink_owned(&mut self) {
        if !self.server {
            return;
        }
        if let Ok(path) = self.path() {
            if let Err(err) = syscall!(unlink(path.as_ptr())) {
                warn!("could not remove fifo: {}", err);
            }
        }
        self.server = false;
    }
}

impl ConnectorImpl for ConnectorFifo {
    fn listen(&mut self) -> Result<()> {
        if self.fd >= 0 {
            return Err(Error::Initialization);
        }

        let path = self.path()?;
        let mode = libc::S_IFIFO | libc::S_IRUSR | libc::S_IWUSR;
        match syscall!(mkfifo(path.as_ptr(), mode as libc::mode_t)) {
            Ok(_) => {}
            // An existing file is used as-is; open() below validates it.
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => {}
            Err(err) => return Err(err.into()),
        }

        self.open_fifo()?;
        self.server = true;
        Ok(())
    }

    fn listening(&self) -> bool {
        self.fd >= 0 && self.server
    }

    fn connect(&mut self) -> Result<()> {
        if self.fd >= 0 {
            return Err(Error::Initialization);
        }
        self.open_fifo()
    }

    fn connected(&self) -> bool {
        self.fd >= 0
    }

    fn accept(&mut self) -> Result<AcceptResult> {
        // A FIFO has no per-client connection to produce.
        Ok(AcceptResult::Shared)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        unix::socket::read_fd(self.fd, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        unix::socket::write_fd(self.fd, buf)
    }

    fn peek(&self) -> Result<usize> {
        if self.fd < 0 {
            return Err(Error::Initialization);
        }
        Ok(unix::bytes_available(self.fd)?)
    }

    fn close(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Err(Error::Initialization);
        }
        unix::close_quietly(self.fd);
        self.fd = -1;
        self.unlink_owned();
        Ok(())
    }

    fn get_read_handle(&self) -> Handle {
        if self.fd < 0 {
            Handle::invalid()
        } else {
            Handle::new(self.fd)
        }
    }

    fn get_write_handle(&self) -> Handle {
        self.get_read_handle()
    }

    fn get_options(&self) -> Options {
        self.options
    }
}

impl Drop for ConnectorFifo {
    fn drop(&mut self) {
        unix::close_quietly(self.fd);
        self.unlink_owned();
    }
}
