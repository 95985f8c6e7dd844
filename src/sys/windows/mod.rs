pub(crate) mod iocp;
pub(crate) mod overlapped;
pub(crate) mod pipe_ops;
pub(crate) mod select_thread;
pub(crate) mod socket;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Networking::WinSock::{
    closesocket, WSACleanup, WSAGetLastError, WSAStartup, INVALID_SOCKET, SOCKET, WSADATA,
};

use crate::error::{Error, Result};

use overlapped::OverlappedContext;

/// The raw OS resource behind a handle: either a file-like `HANDLE` (pipes)
/// or a winsock `SOCKET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawResource {
    Handle(HANDLE),
    Socket(SOCKET),
}

/// The shared record behind a [`Handle`].
///
/// All Windows I/O in this crate is overlapped; the record carries one
/// context for reads and one for writes, plus the simulated blocking flag.
pub(crate) struct SysHandle {
    pub(crate) raw: RawResource,
    pub(crate) blocking: AtomicBool,
    pub(crate) read_context: Mutex<OverlappedContext>,
    pub(crate) write_context: Mutex<OverlappedContext>,
    /// Whether dropping the record closes the resource.
    owned: bool,
}

impl fmt::Debug for SysHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysHandle")
            .field("raw", &self.raw)
            .field("blocking", &self.blocking.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for SysHandle {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        unsafe {
            match self.raw {
                RawResource::Handle(h) if h != INVALID_HANDLE_VALUE => {
                    CloseHandle(h);
                }
                RawResource::Socket(s) if s != INVALID_SOCKET => {
                    closesocket(s);
                }
                _ => {}
            }
        }
    }
}

/// Opaque wrapper around an OS resource.
///
/// Copies share the record; equality is identity of the record, not of the
/// underlying OS value.
#[derive(Debug, Clone, Default)]
pub struct Handle {
    record: Option<Arc<SysHandle>>,
}

impl Handle {
    pub(crate) fn from_handle(h: HANDLE, blocking: bool) -> Handle {
        Handle::from_raw(RawResource::Handle(h), blocking, true)
    }

    pub(crate) fn from_socket(s: SOCKET, blocking: bool) -> Handle {
        Handle::from_raw(RawResource::Socket(s), blocking, true)
    }

    fn from_raw(raw: RawResource, blocking: bool, owned: bool) -> Handle {
        Handle {
            record: Some(Arc::new(SysHandle {
                raw,
                blocking: AtomicBool::new(blocking),
                read_context: Mutex::new(OverlappedContext::new()),
                write_context: Mutex::new(OverlappedContext::new()),
                owned,
            })),
        }
    }

    pub fn invalid() -> Handle {
        Handle::default()
    }

    pub fn valid(&self) -> bool {
        match self.record.as_deref() {
            Some(record) => match record.raw {
                RawResource::Handle(h) => h != INVALID_HANDLE_VALUE,
                RawResource::Socket(s) => s != INVALID_SOCKET,
            },
            None => false,
        }
    }

    pub(crate) fn record(&self) -> Option<&Arc<SysHandle>> {
        self.record.as_ref()
    }

    pub(crate) fn raw(&self) -> Option<RawResource> {
        self.record.as_deref().map(|r| r.raw)
    }

    fn ident(&self) -> usize {
        self.record
            .as_ref()
            .map(|r| Arc::as_ptr(r) as usize)
            .unwrap_or(0)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Handle) -> bool {
        self.ident() == other.ident()
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident().hash(state);
    }
}

impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Handle) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handle {
    fn cmp(&self, other: &Handle) -> std::cmp::Ordering {
        self.ident().cmp(&other.ident())
    }
}

/// Translate the last winsock error into the taxonomy.
pub(crate) fn last_socket_error() -> Error {
    use windows_sys::Win32::Networking::WinSock::*;
    match unsafe { WSAGetLastError() } {
        WSAEWOULDBLOCK | WSAEINPROGRESS | WSAEALREADY => Error::Async,
        WSAEINTR => Error::RepeatAction,
        WSAETIMEDOUT => Error::Timeout,
        WSAEACCES | WSAEFAULT => Error::AccessViolation,
        WSAEADDRINUSE => Error::AddressInUse,
        WSAEADDRNOTAVAIL => Error::AddressNotAvailable,
        WSAENETUNREACH | WSAEHOSTUNREACH => Error::NetworkUnreachable,
        WSAECONNREFUSED => Error::ConnectionRefused,
        WSAECONNRESET | WSAECONNABORTED => Error::ConnectionAborted,
        WSAENOTCONN => Error::NoConnection,
        WSAEMFILE => Error::NumFiles,
        WSAENOBUFS => Error::NumItems,
        WSAEOPNOTSUPP => Error::UnsupportedAction,
        WSAEBADF | WSAENOTSOCK | WSAEINVAL => Error::InvalidValue,
        WSAEAFNOSUPPORT | WSAEPROTONOSUPPORT => Error::InvalidOption,
        WSANOTINITIALISED => Error::Initialization,
        _ => Error::Unexpected,
    }
}

/// Translate the last file/pipe error into the taxonomy.
pub(crate) fn last_pipe_error() -> Error {
    use windows_sys::Win32::Foundation::*;
    match unsafe { GetLastError() } {
        ERROR_IO_PENDING | ERROR_IO_INCOMPLETE => Error::Async,
        ERROR_ACCESS_DENIED => Error::AccessViolation,
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => Error::FsError,
        ERROR_PIPE_BUSY => Error::RepeatAction,
        ERROR_BROKEN_PIPE | ERROR_NO_DATA | ERROR_PIPE_NOT_CONNECTED => Error::ConnectionAborted,
        ERROR_INVALID_HANDLE | ERROR_INVALID_PARAMETER => Error::InvalidValue,
        ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => Error::OutOfMemory,
        ERROR_TOO_MANY_OPEN_FILES => Error::NumFiles,
        ERROR_OPERATION_ABORTED => Error::Aborted,
        _ => Error::Unexpected,
    }
}

pub(crate) fn wsa_startup() -> Result<()> {
    let mut data: WSADATA = unsafe { std::mem::zeroed() };
    // MAKEWORD(2, 2)
    let ret = unsafe { WSAStartup(0x0202, &mut data) };
    if ret != 0 {
        return Err(Error::Initialization);
    }
    Ok(())
}

pub(crate) fn wsa_cleanup() {
    unsafe {
        WSACleanup();
    }
}
