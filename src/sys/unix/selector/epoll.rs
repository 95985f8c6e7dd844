use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use log::trace;

use super::FdMap;
use crate::error::Result;
use crate::event::Events;
use crate::mux::{IoEvent, Multiplexor};
use crate::Connector;

/// `epoll(7)` backend, level triggered.
#[derive(Debug)]
pub(crate) struct Epoll {
    ep: OwnedFd,
    fds: FdMap,
}

impl Epoll {
    pub(crate) fn new() -> Result<Epoll> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Epoll {
            ep,
            fds: FdMap::new(),
        })
    }

    fn apply(&self, fd: RawFd, mask: Events) -> io::Result<()> {
        let ep = self.ep.as_raw_fd();
        if mask.is_empty() {
            let res = syscall!(epoll_ctl(ep, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()));
            return match res {
                Ok(_) => Ok(()),
                // Already gone, e.g. the descriptor was closed first.
                Err(ref err)
                    if err.raw_os_error() == Some(libc::ENOENT)
                        || err.raw_os_error() == Some(libc::EBADF) =>
                {
                    Ok(())
                }
                Err(err) => Err(err),
            };
        }

        let mut event = libc::epoll_event {
            events: interests_to_epoll(mask),
            u64: fd as u64,
        };
        match syscall!(epoll_ctl(ep, libc::EPOLL_CTL_ADD, fd, &mut event)) {
            Ok(_) => Ok(()),
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => {
                syscall!(epoll_ctl(ep, libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }
}

impl Multiplexor for Epoll {
    fn register_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("epoll: registering {:?} for {}", conn, events);
        for (fd, mask) in self.fds.register(conn, events) {
            self.apply(fd, mask)?;
        }
        Ok(())
    }

    fn unregister_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("epoll: unregistering {:?} for {}", conn, events);
        for (fd, mask) in self.fds.unregister(conn, events) {
            self.apply(fd, mask)?;
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<IoEvent>> {
        // `Duration::as_millis` truncates, so round up. This avoids turning
        // sub-millisecond timeouts into a zero timeout.
        let millis = timeout
            .checked_add(Duration::from_nanos(999_999))
            .unwrap_or(timeout)
            .as_millis()
            .min(libc::c_int::MAX as u128) as libc::c_int;

        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(1024);
        let n_events = syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.as_mut_ptr(),
            events.capacity() as i32,
            millis,
        ))?;
        // SAFETY: `epoll_wait` ensures that `n_events` are assigned.
        unsafe { events.set_len(n_events as usize) };

        let mut fired = Vec::with_capacity(events.len());
        for event in &events {
            let fd = event.u64 as RawFd;
            if let Some(entry) = self.fds.get(fd) {
                let mask = epoll_to_interests(event.events) & entry.events;
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

fn interests_to_epoll(events: Events) -> u32 {
    let mut kind = 0;
    if events.intersects(Events::IO_READ) {
        kind |= libc::EPOLLIN | libc::EPOLLPRI;
    }
    if events.intersects(Events::IO_WRITE) {
        kind |= libc::EPOLLOUT;
    }
    if events.intersects(Events::IO_CLOSE) {
        kind |= libc::EPOLLRDHUP;
    }
    // EPOLLERR and EPOLLHUP are always reported, no need to ask.
    kind as u32
}

fn epoll_to_interests(os: u32) -> Events {
    let os = os as libc::c_int;
    let mut events = Events::NONE;
    if os & (libc::EPOLLIN | libc::EPOLLPRI) != 0 {
        events |= Events::IO_READ;
    }
    if os & libc::EPOLLOUT != 0 {
        events |= Events::IO_WRITE;
    }
    if os & (libc::EPOLLRDHUP | libc::EPOLLHUP) != 0 {
        events |= Events::IO_CLOSE;
    }
    if os & libc::EPOLLERR != 0 {
        events |= Events::IO_ERROR;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_translation() {
        let os = interests_to_epoll(Events::IO_READ | Events::IO_WRITE);
        assert_ne!(os as libc::c_int & libc::EPOLLIN, 0);
        assert_ne!(os as libc::c_int & libc::EPOLLOUT, 0);

        let back = epoll_to_interests(os);
        assert!(back.contains(Events::IO_READ | Events::IO_WRITE));
    }

    #[test]
    fn hup_maps_to_close() {
        let events = epoll_to_interests(libc::EPOLLHUP as u32);
        assert!(events.contains(Events::IO_CLOSE));
    }
}
