//! Adopting arbitrary file descriptors, POSIX only.
//!
//! The URL path is either a decimal descriptor number or one of the
//! reserved names `stdin`, `stdout`, `stderr` (case-insensitive). The
//! descriptor's blocking mode is adjusted to match the options, which
//! alters the original descriptor's behaviour. The connector never closes
//! what it does not own.

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

pub(crate) fn factory(
    _api: &Arc<Api>,
    url: &Url,
    _conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    let fd = parse_descriptor(&url.path)?;
    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;

    unix::set_blocking_mode(fd, opts.contains(Options::BLOCKING))?;

    Ok(Box::new(ConnectorFileDesc { fd, options: opts }))
}

fn parse_descriptor(path: &str) -> Result<RawFd> {
    let name = path.strip_prefix('/').ok_or(Error::Format)?;
    if let Ok(fd) = name.parse::<RawFd>() {
        if fd < 0 {
            return Err(Error::Format);
        }
        return Ok(fd);
    }

    match name.to_ascii_lowercase().as_str() {
        "stdin" => Ok(libc::STDIN_FILENO),
        "stdout" => Ok(libc::STDOUT_FILENO),
        "stderr" => Ok(libc::STDERR_FILENO),
        _ => Err(Error::Format),
    }
}

#[derive(Debug)]
pub(crate) struct ConnectorFileDesc {
    fd: RawFd,
    options: Options,
}

impl ConnectorImpl for ConnectorFileDesc {
    fn listen(&mut self) -> Result<()> {
        Ok(())
    }

    fn listening(&self) -> bool {
        true
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn connected(&self) -> bool {
        true
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
        Ok(unix::bytes_available(self.fd)?)
    }

    fn close(&mut self) -> Result<()> {
        // The descriptor has an owner elsewhere.
        Err(Error::UnsupportedAction)
    }

    fn get_read_handle(&self) -> Handle {
        Handle::new(self.fd)
    }

    fn get_write_handle(&self) -> Handle {
        Handle::new(self.fd)
    }

    fn get_options(&self) -> Options {
        self.options
    }

    fn is_blocking(&self) -> bool {
        // The adopted descriptor's actual mode wins over the options.
        unix::get_blocking_mode(self.fd).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_names() {
        assert_eq!(parse_descriptor("/17").unwrap(), 17);
        assert_eq!(parse_descriptor("/stdin").unwrap(), libc::STDIN_FILENO);
        assert_eq!(parse_descriptor("/STDOUT").unwrap(), libc::STDOUT_FILENO);
        assert_eq!(parse_descriptor("/Stderr").unwrap(), libc::STDERR_FILENO);
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(parse_descriptor("/console"), Err(Error::Format));
        assert_eq!(parse_descriptor("/-3"), Err(Error::Format));
        assert_eq!(parse_descriptor(""), Err(Error::Format));
    }
}
