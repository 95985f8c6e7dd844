//! Named pipe connectors, Windows only.
//!
//! A listening connector owns one pipe instance that a client can connect
//! to. `accept` hands the connected instance to a fresh connector and
//! creates a new instance under the same name, which is the only way to
//! get multi-client semantics out of named pipes.

use std::sync::Arc;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{self, Options};
use crate::peer_address::SocketAddrKind;
use crate::registry::ConnectorInfo;
use crate::sys::windows::pipe_ops;
use crate::sys::windows::RawResource;
use crate::url::Url;

use super::{AcceptResult, ConnectorImpl, ConnectorType};

pub(crate) fn factory(
    _api: &Arc<Api>,
    url: &Url,
    _conn_type: ConnectorType,
    requested: Options,
    info: &ConnectorInfo,
) -> Result<Box<dyn ConnectorImpl>> {
    if url.path.is_empty() {
        return Err(Error::Format);
    }
    let opts = options::sanitize(requested, info.default_options, info.possible_options)?;
    let name = pipe_ops::normalize_pipe_name(&url.path);
    Ok(Box::new(ConnectorPipe::new(name, opts)))
}

#[derive(Debug)]
pub(crate) struct ConnectorPipe {
    name: String,
    handle: Handle,
    options: Options,
    server: bool,
    connected: bool,
    /// Drives pending `ConnectNamedPipe` operations on the server side.
    manager: crate::sys::windows::overlapped::OverlappedManager,
}

impl ConnectorPipe {
    pub(crate) fn new(name: String, options: Options) -> ConnectorPipe {
        ConnectorPipe {
            name,
            handle: Handle::invalid(),
            options,
            server: false,
            connected: false,
            manager: crate::sys::windows::overlapped::OverlappedManager::new(1, -1)
                .expect("a growable pool is always accepted"),
        }
    }

    fn from_accepted(name: String, handle: Handle, options: Options) -> ConnectorPipe {
        let mut imp = ConnectorPipe::new(name, options);
        imp.handle = handle;
        imp.connected = true;
        imp
    }

    fn blocking(&self) -> bool {
        self.options.contains(Options::BLOCKING)
    }

    fn raw(&self) -> Result<windows_sys::Win32::Foundation::HANDLE> {
        match self.handle.raw() {
            Some(RawResource::Handle(h)) => Ok(h),
            _ => Err(Error::Initialization),
        }
    }
}

impl ConnectorImpl for ConnectorPipe {
    fn listen(&mut self) -> Result<()> {
        if self.handle.valid() {
            return Err(Error::Initialization);
        }

        let raw = pipe_ops::create_instance(&self.name, true, false)?;
        let handle = Handle::from_handle(raw, self.blocking());
        pipe_ops::drive_accept(&self.manager, raw)?;

        self.handle = handle;
        self.server = true;
        Ok(())
    }

    fn listening(&self) -> bool {
        self.handle.valid() && self.server
    }

    fn connect(&mut self) -> Result<()> {
        if self.handle.valid() {
            return Err(Error::Initialization);
        }

        let raw = pipe_ops::open_client(&self.name, false)?;
        self.handle = Handle::from_handle(raw, self.blocking());
        self.connected = true;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.handle.valid() && self.connected
    }

    fn accept(&mut self) -> Result<AcceptResult> {
        let raw = self.raw()?;

        while !pipe_ops::drive_accept(&self.manager, raw)? {
            if !self.blocking() {
                return Err(Error::Async);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        // Hand the connected instance over and stand up a fresh one so
        // further clients can connect.
        let accepted = std::mem::replace(&mut self.handle, Handle::invalid());
        let imp =
            ConnectorPipe::from_accepted(self.name.clone(), accepted, self.options);

        let raw = pipe_ops::create_instance(&self.name, false, false)?;
        let handle = Handle::from_handle(raw, self.blocking());
        pipe_ops::drive_accept(&self.manager, raw)?;
        self.handle = handle;

        Ok(AcceptResult::New(Box::new(imp), SocketAddrKind::Unspec))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        pipe_ops::read(&self.handle, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        pipe_ops::write(&self.handle, buf)
    }

    fn peek(&self) -> Result<usize> {
        if !self.handle.valid() {
            return Err(Error::Initialization);
        }
        pipe_ops::peek(&self.handle)
    }

    fn close(&mut self) -> Result<()> {
        if !self.handle.valid() {
            return Err(Error::Initialization);
        }
        if let Ok(raw) = self.raw() {
            self.manager.cancel_handle(raw);
        }
        // Dropping the last handle clone closes the instance.
        self.handle = Handle::invalid();
        self.server = false;
        self.connected = false;
        Ok(())
    }

    fn get_read_handle(&self) -> Handle {
        self.handle.clone()
    }

    fn get_write_handle(&self) -> Handle {
        self.handle.clone()
    }

    fn get_options(&self) -> Options {
        self.options
    }
}
