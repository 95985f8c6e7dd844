use std::mem;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::trace;

use super::FdMap;
use crate::error::{Error, Result};
use crate::event::Events;
use crate::mux::{IoEvent, Multiplexor};
use crate::Connector;

/// `select(2)` backend, the lowest common denominator.
///
/// Descriptors at or above `FD_SETSIZE` cannot be watched; registering one
/// fails with [`Error::NumFiles`].
#[derive(Debug)]
pub(crate) struct Select {
    fds: FdMap,
}

impl Select {
    pub(crate) fn new() -> Select {
        Select { fds: FdMap::new() }
    }
}

impl Multiplexor for Select {
    fn register_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        let read = conn.get_read_handle();
        let write = conn.get_write_handle();
        for handle in [read, write] {
            if handle.valid() && handle.raw() as usize >= libc::FD_SETSIZE {
                return Err(Error::NumFiles);
            }
        }

        trace!("select: registering {:?} for {}", conn, events);
        self.fds.register(conn, events);
        Ok(())
    }

    fn unregister_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("select: unregistering {:?} for {}", conn, events);
        self.fds.unregister(conn, events);
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<IoEvent>> {
        let mut read_set = unsafe { mem::zeroed::<libc::fd_set>() };
        let mut write_set = unsafe { mem::zeroed::<libc::fd_set>() };
        let mut error_set = unsafe { mem::zeroed::<libc::fd_set>() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_ZERO(&mut error_set);
        }

        let mut max_fd: RawFd = -1;
        for (fd, entry) in self.fds.iter() {
            if entry.events.intersects(Events::IO_READ | Events::IO_CLOSE) {
                unsafe { libc::FD_SET(*fd, &mut read_set) };
            }
            if entry.events.intersects(Events::IO_WRITE) {
                unsafe { libc::FD_SET(*fd, &mut write_set) };
            }
            unsafe { libc::FD_SET(*fd, &mut error_set) };
            max_fd = max_fd.max(*fd);
        }

        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        syscall!(select(
            max_fd + 1,
            &mut read_set,
            &mut write_set,
            &mut error_set,
            &mut tv,
        ))?;

        let mut fired = Vec::new();
        for (fd, entry) in self.fds.iter() {
            let mut mask = Events::NONE;
            if unsafe { libc::FD_ISSET(*fd, &read_set) } {
                mask |= Events::IO_READ;
            }
            if unsafe { libc::FD_ISSET(*fd, &write_set) } {
                mask |= Events::IO_WRITE;
            }
            if unsafe { libc::FD_ISSET(*fd, &error_set) } {
                mask |= Events::IO_ERROR;
            }
            mask &= entry.events;
            if !mask.is_empty() {
                fired.push(IoEvent {
                    connector: entry.conn.clone(),
                    events: mask,
                });
            }
        }
        Ok(fired)
    }
}
