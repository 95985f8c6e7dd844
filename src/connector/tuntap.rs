//! TUN/TAP device connectors, Linux only.
//!
//! `tun:///name` or `tap:///name` opens `/dev/net/tun` and attaches to the
//! named interface. Address assignment and link state are left to external
//! tooling; this connector only moves packets, one per read or write.

use std::mem;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{self, Options};
use crate::registry::ConnectorInfo;
use crate::sys::unix;
use crate::url::Url;

use super::{AcceptResult, ConnectorImpl, ConnectorType};

const CLONE_DEVICE: &str = "/dev/net/tun\0";

pub(crate) fn factory(
    _api: &Arc<Api>,
    url: &Url,
    conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    let name = url.path.strip_prefix('/').unwrap_or(&url.path);
    if name.is_empty() || name.len() >= libc::IFNAMSIZ {
        return Err(Error::Format);
    }

    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;

    Ok(Box::new(ConnectorTunTap {
        fd: -1,
        name: name.to_string(),
        tap: conn_type == ConnectorType::Tap,
        options: opts,
    }))
}

#[derive(Debug)]
pub(crate) struct ConnectorTunTap {
    fd: RawFd,
    name: String,
    tap: bool,
    options: Options,
}

impl ConnectorTunTap {
    fn open_device(&mut self) -> Result<()> {
        if self.fd >= 0 {
            return Err(Error::Initialization);
        }

        let mut mode = libc::O_RDWR | libc::O_CLOEXEC;
        if !self.options.contains(Options::BLOCKING) {
            mode |= libc::O_NONBLOCK;
        }
        let fd = syscall!(open(CLONE_DEVICE.as_ptr() as *const libc::c_char, mode))?;

        let mut req: libc::ifreq = unsafe { mem::zeroed() };
        for (dst, src) in req.ifr_name.iter_mut().zip(self.name.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        let flags = if self.tap {
            libc::IFF_TAP | libc::IFF_NO_PI
        } else {
            libc::IFF_TUN | libc::IFF_NO_PI
        };
        req.ifr_ifru.ifru_flags = flags as libc::c_short;

        if let Err(err) = syscall!(ioctl(fd, libc::TUNSETIFF, &req)) {
            unix::close_quietly(fd);
            return Err(err.into());
        }

        self.fd = fd;
        Ok(())
    }
}

impl ConnectorImpl for ConnectorTunTap {
    fn listen(&mut self) -> Result<()> {
        self.open_device()
    }

    fn listening(&self) -> bool {
        self.fd >= 0
    }

    fn connect(&mut self) -> Result<()> {
        self.open_device()
    }

    fn connected(&self) -> bool {
        self.fd >= 0
    }

    fn accept(&mut self) -> Result<AcceptResult> {
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

impl Drop for ConnectorTunTap {
    fn drop(&mut self) {
        unix::close_quietly(self.fd);
    }
}
