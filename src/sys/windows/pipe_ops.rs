//! Named pipe plumbing: naming, instance creation, client opens, and
//! POSIX style read/write emulated over overlapped I/O.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::trace;

use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_IO_INCOMPLETE, ERROR_IO_PENDING, ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED,
    GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, PeekNamedPipe, PIPE_ACCESS_DUPLEX, PIPE_ACCESS_OUTBOUND,
    PIPE_READMODE_BYTE, PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES,
};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult};

use crate::error::{Error, Result};
use crate::handle::Handle;

use super::overlapped::{CtxState, OpType, OverlappedAction, OverlappedManager};
use super::{last_pipe_error, SysHandle};

/// Prefix all pipe names live under.
pub(crate) const PIPE_NAMESPACE: &str = r"\\.\pipe\";
const ANON_PREFIX: &str = "crossbar-anonymous";

/// How long a simulated-blocking operation sleeps between progress checks.
const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(1);

const PIPE_BUFFER_SIZE: u32 = 65536;

static ANON_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Normalize a pipe name: everything after the fixed namespace prefix uses
/// backslashes, and the prefix is prepended if missing.
pub(crate) fn normalize_pipe_name(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let body = trimmed.replace('/', "\\");
    if body.starts_with(PIPE_NAMESPACE) {
        body
    } else {
        format!("{}{}", PIPE_NAMESPACE, body)
    }
}

/// A unique name for an anonymous pipe pair. Uniqueness comes from process
/// id plus a counter; a name leaked by a crashed process could in theory
/// collide.
pub(crate) fn anon_pipe_name() -> String {
    let pid = std::process::id();
    let counter = ANON_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{}.{:x}.{:x}", PIPE_NAMESPACE, ANON_PREFIX, pid, counter)
}

/// Create one server-side instance of a named pipe.
pub(crate) fn create_instance(name: &str, first: bool, outbound_only: bool) -> Result<HANDLE> {
    let mut open_mode = FILE_FLAG_OVERLAPPED
        | if outbound_only {
            PIPE_ACCESS_OUTBOUND
        } else {
            PIPE_ACCESS_DUPLEX
        };
    if first {
        open_mode |= FILE_FLAG_FIRST_PIPE_INSTANCE;
    }

    let wname = wide(name);
    let handle = unsafe {
        CreateNamedPipeW(
            wname.as_ptr(),
            open_mode,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE,
            PIPE_UNLIMITED_INSTANCES,
            PIPE_BUFFER_SIZE,
            PIPE_BUFFER_SIZE,
            0,
            ptr::null(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(last_pipe_error());
    }
    trace!("created pipe instance {}", name);
    Ok(handle)
}

/// Open the client end of a named pipe.
pub(crate) fn open_client(name: &str, read_only: bool) -> Result<HANDLE> {
    let access = if read_only {
        GENERIC_READ
    } else {
        GENERIC_READ | GENERIC_WRITE
    };

    let wname = wide(name);
    let handle = unsafe {
        CreateFileW(
            wname.as_ptr(),
            access,
            0,
            ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            0 as HANDLE,
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return match unsafe { GetLastError() } {
            // All instances busy: the caller may retry.
            ERROR_PIPE_BUSY => Err(Error::RepeatAction),
            _ => Err(last_pipe_error()),
        };
    }
    Ok(handle)
}

/// Drive a server instance's `ConnectNamedPipe` through an overlapped
/// manager. One connect may be in flight per handle; repeated requests
/// check progress of the existing one. Returns `Ok(true)` once a client
/// is connected, `Ok(false)` while the accept is still pending.
pub(crate) fn drive_accept(manager: &OverlappedManager, raw: HANDLE) -> Result<bool> {
    let mut driver = |action: OverlappedAction,
                      ctx: &mut super::overlapped::OverlappedContext|
     -> Result<usize> {
        match action {
            OverlappedAction::Schedule => {
                let ok = unsafe { ConnectNamedPipe(raw, &mut ctx.overlapped) };
                if ok != 0 {
                    return Ok(0);
                }
                match unsafe { GetLastError() } {
                    ERROR_PIPE_CONNECTED => Ok(0),
                    ERROR_IO_PENDING => Err(Error::Async),
                    _ => Err(last_pipe_error()),
                }
            }
            OverlappedAction::CheckProgress => {
                let mut transferred = 0u32;
                let ok =
                    unsafe { GetOverlappedResult(raw, &ctx.overlapped, &mut transferred, 0) };
                if ok != 0 {
                    return Ok(0);
                }
                match unsafe { GetLastError() } {
                    ERROR_IO_INCOMPLETE | ERROR_IO_PENDING => Err(Error::Async),
                    _ => Err(last_pipe_error()),
                }
            }
        }
    };

    match manager.request(OpType::Connect, raw, None, &mut driver) {
        Ok(_) => Ok(true),
        Err(Error::Async) => Ok(false),
        Err(err) => Err(err),
    }
}

/// POSIX style read over a pipe handle.
///
/// Non-blocking mode schedules an overlapped read and returns
/// [`Error::Async`] while it is outstanding; blocking mode polls the
/// operation with short sleeps until it completes. A pending zero-byte
/// readability probe is cancelled before a real read is scheduled.
pub(crate) fn read(handle: &Handle, buf: &mut [u8]) -> Result<usize> {
    let record = handle.record().ok_or(Error::Initialization)?;
    let raw = pipe_raw(handle)?;
    let blocking = record.blocking.load(Ordering::Relaxed);

    loop {
        let result = read_step(record, raw, buf);
        match result {
            Err(Error::Async) if blocking => std::thread::sleep(BLOCKING_POLL_INTERVAL),
            other => return other,
        }
    }
}

fn read_step(record: &SysHandle, raw: HANDLE, buf: &mut [u8]) -> Result<usize> {
    let mut ctx = record.read_context.lock().expect("pipe context poisoned");

    if ctx.state == CtxState::Pending {
        if ctx.is_probe() && !buf.is_empty() {
            // Cancel the probe so the real read can go out.
            unsafe {
                CancelIoEx(raw, &ctx.overlapped);
            }
            ctx.reset();
        } else {
            let mut transferred = 0u32;
            let ok = unsafe { GetOverlappedResult(raw, &ctx.overlapped, &mut transferred, 0) };
            if ok == 0 {
                return match unsafe { GetLastError() } {
                    ERROR_IO_INCOMPLETE | ERROR_IO_PENDING => Err(Error::Async),
                    _ => {
                        ctx.reset();
                        Err(last_pipe_error())
                    }
                };
            }
            let n = (transferred as usize).min(buf.len());
            buf[..n].copy_from_slice(&ctx.buffer[..n]);
            ctx.reset();
            return Ok(n);
        }
    }

    // Schedule a fresh read into the context buffer.
    ctx.reset();
    ctx.handle = raw;
    ctx.scheduled = buf.len();
    ctx.buffer.resize(buf.len(), 0);
    let mut transferred = 0u32;
    let ok = unsafe {
        ReadFile(
            raw,
            ctx.buffer.as_mut_ptr(),
            ctx.scheduled as u32,
            &mut transferred,
            &mut ctx.overlapped,
        )
    };
    if ok != 0 {
        let n = (transferred as usize).min(buf.len());
        buf[..n].copy_from_slice(&ctx.buffer[..n]);
        ctx.reset();
        return Ok(n);
    }
    match unsafe { GetLastError() } {
        ERROR_IO_PENDING => {
            ctx.state = CtxState::Pending;
            Err(Error::Async)
        }
        _ => {
            ctx.reset();
            Err(last_pipe_error())
        }
    }
}

/// POSIX style write over a pipe handle; see [`read`] for the blocking
/// emulation.
pub(crate) fn write(handle: &Handle, buf: &[u8]) -> Result<usize> {
    let record = handle.record().ok_or(Error::Initialization)?;
    let raw = pipe_raw(handle)?;
    let blocking = record.blocking.load(Ordering::Relaxed);

    loop {
        let result = write_step(record, raw, buf);
        match result {
            Err(Error::Async) if blocking => std::thread::sleep(BLOCKING_POLL_INTERVAL),
            other => return other,
        }
    }
}

fn write_step(record: &SysHandle, raw: HANDLE, buf: &[u8]) -> Result<usize> {
    let mut ctx = record.write_context.lock().expect("pipe context poisoned");

    if ctx.state == CtxState::Pending {
        let mut transferred = 0u32;
        let ok = unsafe { GetOverlappedResult(raw, &ctx.overlapped, &mut transferred, 0) };
        if ok == 0 {
            return match unsafe { GetLastError() } {
                ERROR_IO_INCOMPLETE | ERROR_IO_PENDING => Err(Error::Async),
                _ => {
                    ctx.reset();
                    Err(last_pipe_error())
                }
            };
        }
        ctx.reset();
        return Ok(transferred as usize);
    }

    ctx.reset();
    ctx.handle = raw;
    ctx.buffer.extend_from_slice(buf);
    ctx.scheduled = buf.len();
    let mut transferred = 0u32;
    let ok = unsafe {
        WriteFile(
            raw,
            ctx.buffer.as_ptr(),
            ctx.scheduled as u32,
            &mut transferred,
            &mut ctx.overlapped,
        )
    };
    if ok != 0 {
        ctx.reset();
        return Ok(transferred as usize);
    }
    match unsafe { GetLastError() } {
        ERROR_IO_PENDING => {
            ctx.state = CtxState::Pending;
            Err(Error::Async)
        }
        _ => {
            ctx.reset();
            Err(last_pipe_error())
        }
    }
}

/// Bytes available on a pipe without consuming them.
pub(crate) fn peek(handle: &Handle) -> Result<usize> {
    let raw = pipe_raw(handle)?;
    let mut available = 0u32;
    let ok = unsafe {
        PeekNamedPipe(raw, ptr::null_mut(), 0, ptr::null_mut(), &mut available, ptr::null_mut())
    };
    if ok == 0 {
        return Err(last_pipe_error());
    }
    Ok(available as usize)
}

fn pipe_raw(handle: &Handle) -> Result<HANDLE> {
    match handle.raw() {
        Some(super::RawResource::Handle(h)) if h != INVALID_HANDLE_VALUE => Ok(h),
        _ => Err(Error::Initialization),
    }
}

/// An anonymous pipe realized as a uniquely named pipe pair: the server
/// end is write-only, the client end read-only.
#[derive(Debug)]
pub(crate) struct AnonPipePair {
    read: Handle,
    write: Handle,
}

impl AnonPipePair {
    pub(crate) fn create(blocking: bool) -> Result<AnonPipePair> {
        let name = anon_pipe_name();
        let manager = OverlappedManager::new(1, 0)?;

        let server = create_instance(&name, true, true)?;
        let write = Handle::from_handle(server, blocking);

        // Start accepting before the client opens, then poll to completion;
        // the open itself satisfies the connect.
        let mut connected = drive_accept(&manager, server)?;

        let client = open_client(&name, true)?;
        let read = Handle::from_handle(client, blocking);

        while !connected {
            connected = drive_accept(&manager, server)?;
            if !connected {
                std::thread::sleep(BLOCKING_POLL_INTERVAL);
            }
        }

        Ok(AnonPipePair { read, write })
    }

    pub(crate) fn read_handle(&self) -> Handle {
        self.read.clone()
    }

    pub(crate) fn write_handle(&self) -> Handle {
        self.write.clone()
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        read(&self.read, buf)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        write(&self.write, buf)
    }

    pub(crate) fn peek(&self) -> Result<usize> {
        peek(&self.read)
    }
}
