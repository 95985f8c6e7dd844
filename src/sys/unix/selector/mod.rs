#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod epoll;

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
))]
pub(crate) mod kqueue;

pub(crate) mod poll;
pub(crate) mod select;

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use crate::connector::Connector;
use crate::event::Events;

/// Interest bookkeeping shared by every descriptor based backend.
///
/// A connector contributes up to two descriptors. The read handle is
/// registered for everything but write interest, the write handle for
/// everything but read interest; for plain sockets the two coincide and the
/// masks merge.
#[derive(Debug, Default)]
pub(crate) struct FdMap {
    entries: HashMap<RawFd, FdEntry>,
}

#[derive(Debug)]
pub(crate) struct FdEntry {
    pub(crate) conn: Connector,
    pub(crate) events: Events,
}

/// A mask change produced by (un)registration. An empty mask means the
/// descriptor left the set.
pub(crate) type MaskChange = (RawFd, Events);

impl FdMap {
    pub(crate) fn new() -> FdMap {
        FdMap::default()
    }

    fn split(conn: &Connector, events: Events) -> Vec<(RawFd, Events)> {
        let read = conn.get_read_handle();
        let write = conn.get_write_handle();

        let mut parts = Vec::with_capacity(2);
        if read.valid() {
            if read == write {
                parts.push((read.raw(), events));
                return parts;
            }
            parts.push((read.raw(), events - Events::IO_WRITE));
        }
        if write.valid() {
            parts.push((write.raw(), events - Events::IO_READ));
        }
        parts
    }

    pub(crate) fn register(&mut self, conn: &Connector, events: Events) -> Vec<MaskChange> {
        let mut changes = Vec::with_capacity(2);
        for (fd, mask) in FdMap::split(conn, events) {
            if mask.is_empty() {
                continue;
            }
            let entry = self.entries.entry(fd).or_insert_with(|| FdEntry {
                conn: conn.clone(),
                events: Events::NONE,
            });
            entry.conn = conn.clone();
            entry.events |= mask;
            changes.push((fd, entry.events));
        }
        changes
    }

    pub(crate) fn unregister(&mut self, conn: &Connector, events: Events) -> Vec<MaskChange> {
        // An empty mask removes the registration entirely.
        let events = if events.is_empty() {
            Events::ALL_BUILTIN
        } else {
            events
        };

        let mut changes = Vec::with_capacity(2);
        for (fd, mask) in FdMap::split(conn, events) {
            if let Some(entry) = self.entries.get_mut(&fd) {
                entry.events -= mask;
                let remaining = entry.events;
                if remaining.is_empty() {
                    self.entries.remove(&fd);
                    changes.push((fd, Events::NONE));
                } else {
                    changes.push((fd, remaining));
                }
            }
        }
        changes
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<&FdEntry> {
        self.entries.get(&fd)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&RawFd, &FdEntry)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map() {
        let map = FdMap::new();
        assert_eq!(map.len(), 0);
        assert!(map.get(1).is_none());
    }

    // Registration behaviour is covered through the backend integration
    // tests; connectors with live descriptors are needed for that.
}
