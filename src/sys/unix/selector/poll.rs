use std::time::Duration;

use log::trace;

use super::FdMap;
use crate::error::Result;
use crate::event::Events;
use crate::mux::{IoEvent, Multiplexor};
use crate::Connector;

/// `poll(2)` backend.
///
/// The pollfd array is rebuilt for every wait from the registration map.
/// That keeps registration cheap and avoids index bookkeeping; the backend
/// is a fallback for platforms without epoll or kqueue anyway.
#[derive(Debug)]
pub(crate) struct Poll {
    fds: FdMap,
}

impl Poll {
    pub(crate) fn new() -> Poll {
        Poll { fds: FdMap::new() }
    }
}

impl Multiplexor for Poll {
    fn register_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("poll: registering {:?} for {}", conn, events);
        self.fds.register(conn, events);
        Ok(())
    }

    fn unregister_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        trace!("poll: unregistering {:?} for {}", conn, events);
        self.fds.unregister(conn, events);
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<IoEvent>> {
        let mut pollfds: Vec<libc::pollfd> = self
            .fds
            .iter()
            .map(|(fd, entry)| libc::pollfd {
                fd: *fd,
                events: interests_to_poll(entry.events),
                revents: 0,
            })
            .collect();

        let millis = timeout
            .checked_add(Duration::from_nanos(999_999))
            .unwrap_or(timeout)
            .as_millis()
            .min(libc::c_int::MAX as u128) as libc::c_int;

        syscall!(poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, millis))?;

        let mut fired = Vec::new();
        for pollfd in &pollfds {
            if pollfd.revents == 0 {
                continue;
            }
            if let Some(entry) = self.fds.get(pollfd.fd) {
                let mask = poll_to_interests(pollfd.revents) & entry.events;
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

fn interests_to_poll(events: Events) -> libc::c_short {
    let mut kind = 0;
    if events.intersects(Events::IO_READ) {
        kind |= libc::POLLIN | libc::POLLPRI;
    }
    if events.intersects(Events::IO_WRITE) {
        kind |= libc::POLLOUT;
    }
    // POLLHUP, POLLERR and POLLNVAL are always delivered.
    kind
}

fn poll_to_interests(os: libc::c_short) -> Events {
    let mut events = Events::NONE;
    if os & (libc::POLLIN | libc::POLLPRI) != 0 {
        events |= Events::IO_READ;
    }
    if os & libc::POLLOUT != 0 {
        events |= Events::IO_WRITE;
    }
    if os & libc::POLLHUP != 0 {
        events |= Events::IO_CLOSE;
    }
    if os & (libc::POLLERR | libc::POLLNVAL) != 0 {
        events |= Events::IO_ERROR;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_translation() {
        let os = interests_to_poll(Events::IO_READ);
        assert_ne!(os & libc::POLLIN, 0);
        assert_eq!(os & libc::POLLOUT, 0);
    }

    #[test]
    fn revents_translation() {
        assert!(poll_to_interests(libc::POLLHUP).contains(Events::IO_CLOSE));
        assert!(poll_to_interests(libc::POLLNVAL).contains(Events::IO_ERROR));
    }
}
