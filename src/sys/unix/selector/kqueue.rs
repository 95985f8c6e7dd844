use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use log::trace;

use super::FdMap;
use crate::error::Result;
use crate::event::Events;
use crate::mux::{IoEvent, Multiplexor};
use crate::Connector;

// Type of the `filter` and `flags` fields differs across the BSDs.
#[cfg(any(target_os = "freebsd", target_os = "dragonfly", target_os = "ios", target_os = "macos"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
type Filter = u32;

#[cfg(any(target_os = "freebsd", target_os = "dragonfly", target_os = "ios", target_os = "macos"))]
type Flags = libc::c_ushort;
#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
type Flags = u32;

/// `kqueue(2)` backend.
#[derive(Debug)]
pub(crate) struct Kqueue {
    kq: OwnedFd,
    fds: FdMap,
}

impl Kqueue {
    pub(crate) fn new() -> Result<Kqueue> {
        // SAFETY: `kqueue(2)` ensures the fd is valid.
        let kq = unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) };
        syscall!(fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Kqueue {
            kq,
            fds: FdMap::new(),
        })
    }

    fn apply(&self, fd: RawFd, mask: Events) -> io::Result<()> {
        let mut changes: Vec<libc::kevent> = Vec::with_capacity(2);

        let flag_for = |wanted: bool| -> Flags {
            if wanted {
                (libc::EV_ADD | libc::EV_ENABLE) as Flags
            } else {
                libc::EV_DELETE as Flags
            }
        };

        changes.push(kevent_for(
            fd,
            libc::EVFILT_READ as Filter,
            flag_for(mask.intersects(Events::IO_READ | Events::IO_CLOSE)),
        ));
        changes.push(kevent_for(
            fd,
            libc::EVFILT_WRITE as Filter,
            flag_for(mask.intersects(Events::IO_WRITE)),
        ));

        syscall!(kevent(
            self.kq.as_raw_fd(),
            changes.as_ptr(),
            changes.len() as _,
            ptr::null_mut(),
            0,
            ptr::null(),
        ))?;

        // Deleting a filter that was never added reports ENOENT through the
        // changelist; the call above succeeds regardless, which is what we
        // want here.
        Ok(())
    }
}

impl Multiplexor for Kqueue {
    fn register_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("kqueue: registering {:?} for {}", conn, events);
        for (fd, mask) in self.fds.register(conn, events) {
            self.apply(fd, mask)?;
        }
        Ok(())
    }

    fn unregister_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("kqueue: unregistering {:?} for {}", conn, events);
        for (fd, mask) in self.fds.unregister(conn, events) {
            self.apply(fd, mask)?;
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<IoEvent>> {
        let timespec = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };

        let mut events: Vec<libc::kevent> = Vec::with_capacity(1024);
        let n_events = syscall!(kevent(
            self.kq.as_raw_fd(),
            ptr::null(),
            0,
            events.as_mut_ptr(),
            events.capacity() as _,
            &timespec,
        ))?;
        // SAFETY: `kevent` assigned `n_events` entries.
        unsafe { events.set_len(n_events as usize) };

        let mut fired = Vec::with_capacity(events.len());
        for event in &events {
            let fd = event.ident as RawFd;
            if let Some(entry) = self.fds.get(fd) {
                let mut mask = Events::NONE;
                if event.filter == libc::EVFILT_READ as Filter {
                    mask |= Events::IO_READ;
                }
                if event.filter == libc::EVFILT_WRITE as Filter {
                    mask |= Events::IO_WRITE;
                }
                if event.flags as Flags & libc::EV_EOF as Flags != 0 {
                    mask |= Events::IO_CLOSE;
                }
                if event.flags as Flags & libc::EV_ERROR as Flags != 0 {
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
        }
        Ok(fired)
    }
}

fn kevent_for(fd: RawFd, filter: Filter, flags: Flags) -> libc::kevent {
    let mut kevent = unsafe { std::mem::zeroed::<libc::kevent>() };
    kevent.ident = fd as libc::uintptr_t;
    kevent.filter = filter;
    kevent.flags = flags;
    kevent
}
