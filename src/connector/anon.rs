//! Anonymous pipe connectors.
//!
//! On POSIX this is `pipe(2)`: a read and a write descriptor with no name.
//! On Windows anonymous pipes do not support overlapped I/O, so a uniquely
//! named pipe pair stands in; the name combines process id and a counter.
//! Either way there is no server/client distinction: `listen`, `connect`
//! and `accept` all yield the same established channel.

use std::sync::Arc;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{self, Options};
use crate::registry::ConnectorInfo;
use crate::url::Url;

use super::{AcceptResult, ConnectorImpl, ConnectorType};

pub(crate) fn factory(
    _api: &Arc<Api>,
    url: &Url,
    _conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    if !url.path.is_empty() {
        // A path component makes no sense for anon:// connectors.
        return Err(Error::Format);
    }
    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;
    Ok(Box::new(ConnectorAnon::new(opts)))
}

cfg_unix! {
    use std::os::unix::io::RawFd;

    #[derive(Debug)]
    pub(crate) struct ConnectorAnon {
        fds: [RawFd; 2],
        options: Options,
    }

    impl ConnectorAnon {
        pub(crate) fn new(options: Options) -> ConnectorAnon {
            ConnectorAnon {
                fds: [-1, -1],
                options,
            }
        }

        fn create_pipe(&mut self) -> Result<()> {
            if self.connected() {
                return Err(Error::Initialization);
            }
            let blocking = self.options.contains(Options::BLOCKING);
            self.fds = crate::sys::unix::pipe::new_raw(blocking)?;
            Ok(())
        }
    }

    impl ConnectorImpl for ConnectorAnon {
        fn listen(&mut self) -> Result<()> {
            self.create_pipe()
        }

        fn listening(&self) -> bool {
            self.connected()
        }

        fn connect(&mut self) -> Result<()> {
            self.create_pipe()
        }

        fn connected(&self) -> bool {
            self.fds[0] >= 0 && self.fds[1] >= 0
        }

        fn accept(&mut self) -> Result<AcceptResult> {
            // The channel already exists.
            Ok(AcceptResult::Shared)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            crate::sys::unix::socket::read_fd(self.fds[0], buf)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            crate::sys::unix::socket::write_fd(self.fds[1], buf)
        }

        fn peek(&self) -> Result<usize> {
            if !self.connected() {
                return Err(Error::Initialization);
            }
            Ok(crate::sys::unix::bytes_available(self.fds[0])?)
        }

        fn close(&mut self) -> Result<()> {
            if !self.connected() {
                return Err(Error::Initialization);
            }
            crate::sys::unix::close_quietly(self.fds[0]);
            crate::sys::unix::close_quietly(self.fds[1]);
            self.fds = [-1, -1];
            Ok(())
        }

        fn get_read_handle(&self) -> Handle {
            if self.fds[0] < 0 {
                Handle::invalid()
            } else {
                Handle::new(self.fds[0])
            }
        }

        fn get_write_handle(&self) -> Handle {
            if self.fds[1] < 0 {
                Handle::invalid()
            } else {
                Handle::new(self.fds[1])
            }
        }

        fn get_options(&self) -> Options {
            self.options
        }
    }

    impl Drop for ConnectorAnon {
        fn drop(&mut self) {
            crate::sys::unix::close_quietly(self.fds[0]);
            crate::sys::unix::close_quietly(self.fds[1]);
        }
    }
}

cfg_windows! {
    #[derive(Debug)]
    pub(crate) struct ConnectorAnon {
        pipe: Option<crate::sys::windows::pipe_ops::AnonPipePair>,
        options: Options,
    }

    impl ConnectorAnon {
        pub(crate) fn new(options: Options) -> ConnectorAnon {
            ConnectorAnon { pipe: None, options }
        }

        fn create_pipe(&mut self) -> Result<()> {
            if self.pipe.is_some() {
                return Err(Error::Initialization);
            }
            let blocking = self.options.contains(Options::BLOCKING);
            self.pipe = Some(crate::sys::windows::pipe_ops::AnonPipePair::create(blocking)?);
            Ok(())
        }
    }

    impl ConnectorImpl for ConnectorAnon {
        fn listen(&mut self) -> Result<()> {
            self.create_pipe()
        }

        fn listening(&self) -> bool {
            self.connected()
        }

        fn connect(&mut self) -> Result<()> {
            self.create_pipe()
        }

        fn connected(&self) -> bool {
            self.pipe.is_some()
        }

        fn accept(&mut self) -> Result<AcceptResult> {
            Ok(AcceptResult::Shared)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.pipe
                .as_mut()
                .ok_or(Error::Initialization)?
                .read(buf)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.pipe
                .as_mut()
                .ok_or(Error::Initialization)?
                .write(buf)
        }

        fn peek(&self) -> Result<usize> {
            self.pipe.as_ref().ok_or(Error::Initialization)?.peek()
        }

        fn close(&mut self) -> Result<()> {
            self.pipe.take().ok_or(Error::Initialization)?;
            Ok(())
        }

        fn get_read_handle(&self) -> Handle {
            self.pipe
                .as_ref()
                .map(|p| p.read_handle())
                .unwrap_or_default()
        }

        fn get_write_handle(&self) -> Handle {
            self.pipe
                .as_ref()
                .map(|p| p.write_handle())
                .unwrap_or_default()
        }

        fn get_options(&self) -> Options {
            self.options
        }
    }
}
