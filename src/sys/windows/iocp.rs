//! The composite Windows multiplexor.
//!
//! File-like handles (pipes) associate with a completion port; readiness
//! is synthesized from completion packets, with zero-byte read probes
//! issued before each wait so the port has something to complete when
//! bytes arrive. Sockets are watched by the select thread, which posts a
//! wake packet when it queues synthetic events. Events from both sides are
//! de-duplicated before they are returned.

use std::collections::HashMap;
use std::ptr;
use std::time::Duration;

use log::{trace, warn};

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_IO_PENDING, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::ReadFile;
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
};

use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::event::Events;
use crate::mux::{IoEvent, Multiplexor};

use super::overlapped::CtxState;
use super::select_thread::{SelectThread, WAKE_KEY};
use super::RawResource;

pub(crate) struct Iocp {
    port: HANDLE,
    /// File handle registrations, keyed by the raw handle value which also
    /// serves as the completion key.
    handles: HashMap<usize, (Connector, Events)>,
    select: SelectThread,
}

// The completion port is owned by this multiplexor; the scheduler moves it
// between threads but never shares it.
unsafe impl Send for Iocp {}

impl std::fmt::Debug for Iocp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iocp")
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl Iocp {
    pub(crate) fn new() -> Result<Iocp> {
        let port =
            unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0 as HANDLE, 0, 0) };
        if port == 0 as HANDLE {
            return Err(Error::Unexpected);
        }
        Ok(Iocp {
            port,
            handles: HashMap::new(),
            select: SelectThread::start(port),
        })
    }

    /// Schedule a zero-byte read on every file handle with read interest
    /// and no outstanding read, so the port completes when bytes arrive.
    fn arm_probes(&self) {
        for (conn, events) in self.handles.values() {
            if !events.intersects(Events::IO_READ) {
                continue;
            }
            let handle = conn.get_read_handle();
            let Some(record) = handle.record().cloned() else {
                continue;
            };
            let RawResource::Handle(raw) = record.raw else {
                continue;
            };

            let mut ctx = record.read_context.lock().expect("probe context poisoned");
            if ctx.state == CtxState::Pending {
                continue;
            }
            ctx.reset();
            ctx.handle = raw;
            ctx.scheduled = 0;
            let ok = unsafe {
                ReadFile(raw, ptr::null_mut(), 0, ptr::null_mut(), &mut ctx.overlapped)
            };
            if ok == 0 {
                match unsafe { GetLastError() } {
                    ERROR_IO_PENDING => {
                        ctx.state = CtxState::Pending;
                        trace!("armed zero-byte probe on {:?}", raw);
                    }
                    err => {
                        warn!("could not arm read probe: {}", err);
                    }
                }
            }
            // An immediate success means data is already there; the
            // completion packet is queued regardless.
        }
    }
}

impl Multiplexor for Iocp {
    fn register_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        for (handle, mask) in [
            (conn.get_read_handle(), events - Events::IO_WRITE),
            (conn.get_write_handle(), events - Events::IO_READ),
        ] {
            if !handle.valid() || mask.is_empty() {
                continue;
            }
            match handle.raw() {
                Some(RawResource::Socket(sock)) => {
                    self.select.register(sock, conn, mask);
                }
                Some(RawResource::Handle(raw)) => {
                    let key = raw as usize;
                    let known = self.handles.contains_key(&key);
                    let entry = self
                        .handles
                        .entry(key)
                        .or_insert_with(|| (conn.clone(), Events::NONE));
                    entry.0 = conn.clone();
                    entry.1 |= mask;
                    if !known {
                        let res =
                            unsafe { CreateIoCompletionPort(raw, self.port, key, 0) };
                        if res == 0 as HANDLE {
                            self.handles.remove(&key);
                            return Err(Error::InvalidValue);
                        }
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    fn unregister_connector(&mut self, conn: &Connector, events: Events) -> Result<()> {
        let events = if events.is_empty() {
            Events::ALL_BUILTIN
        } else {
            events
        };
        for (handle, mask) in [
            (conn.get_read_handle(), events - Events::IO_WRITE),
            (conn.get_write_handle(), events - Events::IO_READ),
        ] {
            match handle.raw() {
                Some(RawResource::Socket(sock)) => self.select.unregister(sock, mask),
                Some(RawResource::Handle(raw)) => {
                    let key = raw as usize;
                    if let Some(entry) = self.handles.get_mut(&key) {
                        entry.1 -= mask;
                        if entry.1.is_empty() {
                            // A handle cannot be detached from a port; the
                            // registration entry going away is enough to
                            // stop reporting it.
                            self.handles.remove(&key);
                        }
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<IoEvent>> {
        self.arm_probes();

        let millis = timeout
            .checked_add(Duration::from_nanos(999_999))
            .unwrap_or(timeout)
            .as_millis()
            .min(u32::MAX as u128) as u32;

        let mut fired: Vec<IoEvent> = Vec::new();
        let mut first = true;
        loop {
            let mut transferred = 0u32;
            let mut key = 0usize;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port,
                    &mut transferred,
                    &mut key,
                    &mut overlapped,
                    if first { millis } else { 0 },
                )
            };
            first = false;

            if ok == 0 && overlapped.is_null() {
                let err = unsafe { GetLastError() };
                if err == WAIT_TIMEOUT {
                    break;
                }
                return Err(Error::Unexpected);
            }

            if key == WAKE_KEY {
                // Synthetic socket events are drained below.
                continue;
            }

            if let Some((conn, registered)) = self.handles.get(&key) {
                let mut mask = Events::NONE;
                if !overlapped.is_null() {
                    // Whether probe, real read or write completion, the
                    // handle is now actionable for its registered
                    // interests.
                    let is_read =
                        conn.get_read_handle().record().map_or(false, |record| {
                            let ctx =
                                record.read_context.lock().expect("probe context poisoned");
                            ptr::addr_of!(ctx.overlapped) as usize == overlapped as usize
                        });
                    if is_read {
                        mask |= Events::IO_READ;
                        if let Some(record) = conn.get_read_handle().record() {
                            let mut ctx =
                                record.read_context.lock().expect("probe context poisoned");
                            if ctx.is_probe() {
                                // Probe done; a real read can go out now.
                                ctx.reset();
                            }
                        }
                    } else {
                        mask |= Events::IO_WRITE | Events::IO_OPEN;
                    }
                }
                mask &= *registered | Events::IO_OPEN;
                if !mask.is_empty() {
                    fired.push(IoEvent {
                        connector: conn.clone(),
                        events: mask,
                    });
                }
            }
        }

        // Merge in the select thread's synthetic socket events.
        fired.extend(self.select.drain());

        // De-duplicate: one event per (connector, bit) pair.
        let mut merged: Vec<IoEvent> = Vec::with_capacity(fired.len());
        for event in fired {
            match merged
                .iter_mut()
                .find(|e| e.connector == event.connector)
            {
                Some(slot) => slot.events |= event.events,
                None => merged.push(event),
            }
        }
        Ok(merged)
    }
}

impl Drop for Iocp {
    fn drop(&mut self) {
        if self.port != 0 as HANDLE {
            unsafe {
                CloseHandle(self.port);
            }
        }
    }
}
