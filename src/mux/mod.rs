//! The platform abstract readiness notification layer.
//!
//! A [`Multiplexor`] maps connectors to fired event masks. One backend
//! exists per OS primitive; [`create`] picks the best available one in
//! automatic mode. The scheduler owns exactly one multiplexor, but nothing
//! prevents standalone use for synchronous readiness polling.

use std::time::Duration;

use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::event::Events;

/// A single fired readiness notification.
///
/// One `wait` call may yield several events for the same connector, one per
/// fired bit. Consumers that need a single invocation per connector merge
/// the masks themselves.
#[derive(Debug, Clone)]
pub struct IoEvent {
    pub connector: Connector,
    pub events: Events,
}

/// Readiness interest registration and event retrieval.
pub trait Multiplexor: Send {
    /// Add interest in `events` for the connector's handles.
    fn register_connector(&mut self, conn: &Connector, events: Events) -> Result<()>;

    /// Subtract interest. An empty mask removes the connector entirely.
    fn unregister_connector(&mut self, conn: &Connector, events: Events) -> Result<()>;

    /// Block up to `timeout` and return the events that fired.
    fn wait(&mut self, timeout: Duration) -> Result<Vec<IoEvent>>;
}

/// Selects a multiplexor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MuxType {
    /// Pick the best backend for the platform.
    Automatic,
    Epoll,
    Kqueue,
    Poll,
    Select,
    Iocp,
}

/// Instantiate a multiplexor.
///
/// In automatic mode the picking order is epoll, kqueue, IOCP, poll,
/// select; the first backend the platform supports wins. Requesting an
/// unsupported backend explicitly fails with [`Error::InvalidOption`].
pub fn create(which: MuxType) -> Result<Box<dyn Multiplexor>> {
    match which {
        MuxType::Automatic => {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            {
                return Ok(Box::new(crate::sys::unix::selector::epoll::Epoll::new()?));
            }
            #[cfg(any(
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "ios",
                target_os = "macos",
                target_os = "netbsd",
                target_os = "openbsd",
            ))]
            {
                return Ok(Box::new(crate::sys::unix::selector::kqueue::Kqueue::new()?));
            }
            #[cfg(windows)]
            {
                return Ok(Box::new(crate::sys::windows::iocp::Iocp::new()?));
            }
            #[allow(unreachable_code)]
            {
                #[cfg(unix)]
                return Ok(Box::new(crate::sys::unix::selector::poll::Poll::new()));
                #[allow(unreachable_code)]
                Err(Error::NotImplemented)
            }
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        MuxType::Epoll => Ok(Box::new(crate::sys::unix::selector::epoll::Epoll::new()?)),

        #[cfg(any(
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "ios",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "openbsd",
        ))]
        MuxType::Kqueue => Ok(Box::new(crate::sys::unix::selector::kqueue::Kqueue::new()?)),

        #[cfg(unix)]
        MuxType::Poll => Ok(Box::new(crate::sys::unix::selector::poll::Poll::new())),

        #[cfg(unix)]
        MuxType::Select => Ok(Box::new(crate::sys::unix::selector::select::Select::new())),

        #[cfg(windows)]
        MuxType::Iocp => Ok(Box::new(crate::sys::windows::iocp::Iocp::new()?)),

        _ => Err(Error::InvalidOption),
    }
}
