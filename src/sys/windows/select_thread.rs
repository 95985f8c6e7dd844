//! The socket side of the Windows multiplexor.
//!
//! Completion ports do not provide readiness for plain sockets, so a side
//! thread runs `select` over the registered set and posts a wake packet to
//! the completion port whenever it queues synthetic events. The IOCP wait
//! drains the queue on wakeup and merges the events with its own.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Networking::WinSock::{
    select, FD_SET, SOCKET, TIMEVAL,
};
use windows_sys::Win32::System::IO::PostQueuedCompletionStatus;

use crate::connector::Connector;
use crate::event::Events;
use crate::mux::IoEvent;

/// Completion key marking a wake packet from the select thread.
pub(crate) const WAKE_KEY: usize = usize::MAX;

const SELECT_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) struct SelectShared {
    /// Socket registrations mirrored from the multiplexor.
    regs: Mutex<HashMap<SOCKET, (Connector, Events)>>,
    /// Synthetic events awaiting pickup by the IOCP wait.
    queue: Mutex<Vec<IoEvent>>,
    running: AtomicBool,
    port: HANDLE,
}

// The completion port handle is only used with PostQueuedCompletionStatus,
// which is thread safe.
unsafe impl Send for SelectShared {}
unsafe impl Sync for SelectShared {}

pub(crate) struct SelectThread {
    shared: Arc<SelectShared>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SelectThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectThread").finish_non_exhaustive()
    }
}

impl SelectThread {
    pub(crate) fn start(port: HANDLE) -> SelectThread {
        let shared = Arc::new(SelectShared {
            regs: Mutex::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            port,
        });

        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("crossbar-select".to_string())
            .spawn(move || select_loop(loop_shared))
            .expect("could not spawn select thread");

        SelectThread {
            shared,
            thread: Some(thread),
        }
    }

    pub(crate) fn register(&self, sock: SOCKET, conn: &Connector, events: Events) {
        let mut regs = self.shared.regs.lock().expect("select registrations poisoned");
        let entry = regs
            .entry(sock)
            .or_insert_with(|| (conn.clone(), Events::NONE));
        entry.0 = conn.clone();
        entry.1 |= events;
    }

    pub(crate) fn unregister(&self, sock: SOCKET, events: Events) {
        let events = if events.is_empty() {
            Events::ALL_BUILTIN
        } else {
            events
        };
        let mut regs = self.shared.regs.lock().expect("select registrations poisoned");
        if let Some(entry) = regs.get_mut(&sock) {
            entry.1 -= events;
            if entry.1.is_empty() {
                regs.remove(&sock);
            }
        }
    }

    /// Take whatever the select loop queued since the last call.
    pub(crate) fn drain(&self) -> Vec<IoEvent> {
        mem::take(&mut *self.shared.queue.lock().expect("select queue poisoned"))
    }
}

impl Drop for SelectThread {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn select_loop(shared: Arc<SelectShared>) {
    debug!("select thread started");
    while shared.running.load(Ordering::Acquire) {
        let snapshot: Vec<(SOCKET, Connector, Events)> = {
            let regs = shared.regs.lock().expect("select registrations poisoned");
            regs.iter()
                .map(|(sock, (conn, events))| (*sock, conn.clone(), *events))
                .collect()
        };

        if snapshot.is_empty() {
            std::thread::sleep(SELECT_INTERVAL);
            continue;
        }

        let mut read_set: FD_SET = unsafe { mem::zeroed() };
        let mut write_set: FD_SET = unsafe { mem::zeroed() };
        let mut error_set: FD_SET = unsafe { mem::zeroed() };
        for (sock, _, events) in &snapshot {
            if events.intersects(Events::IO_READ | Events::IO_CLOSE) {
                fd_set_insert(&mut read_set, *sock);
            }
            if events.intersects(Events::IO_WRITE) {
                fd_set_insert(&mut write_set, *sock);
            }
            fd_set_insert(&mut error_set, *sock);
        }

        let timeout = TIMEVAL {
            tv_sec: 0,
            tv_usec: SELECT_INTERVAL.subsec_micros() as i32,
        };
        let n = unsafe {
            select(
                0, // ignored on Windows
                &mut read_set,
                &mut write_set,
                &mut error_set,
                &timeout,
            )
        };
        if n < 0 {
            warn!("select thread: {}", super::last_socket_error());
            std::thread::sleep(SELECT_INTERVAL);
            continue;
        }
        if n == 0 {
            continue;
        }

        let mut fired = Vec::new();
        for (sock, conn, events) in snapshot {
            let mut mask = Events::NONE;
            if fd_set_contains(&read_set, sock) {
                mask |= Events::IO_READ;
            }
            if fd_set_contains(&write_set, sock) {
                mask |= Events::IO_WRITE;
            }
            if fd_set_contains(&error_set, sock) {
                mask |= Events::IO_ERROR;
            }
            mask &= events;
            if !mask.is_empty() {
                fired.push(IoEvent {
                    connector: conn,
                    events: mask,
                });
            }
        }

        if !fired.is_empty() {
            shared
                .queue
                .lock()
                .expect("select queue poisoned")
                .extend(fired);
            // Wake the IOCP wait so it picks the queue up.
            unsafe {
                PostQueuedCompletionStatus(shared.port, 0, WAKE_KEY, std::ptr::null_mut());
            }
        }
    }
    debug!("select thread stopped");
}

fn fd_set_insert(set: &mut FD_SET, sock: SOCKET) {
    let count = set.fd_count as usize;
    if count < set.fd_array.len() {
        set.fd_array[count] = sock;
        set.fd_count += 1;
    }
}

fn fd_set_contains(set: &FD_SET, sock: SOCKET) -> bool {
    set.fd_array[..set.fd_count as usize].contains(&sock)
}
