//! Overlapped operation contexts and the pooling manager.
//!
//! Windows has no readiness notifications for file-like handles, so POSIX
//! style read/write is simulated: each in-flight operation owns an
//! `OVERLAPPED` context from a pool, and completion packets arriving on
//! the IOCP stand in for readiness. A pending read of length zero is a
//! pure readability probe; it completes when bytes arrive without
//! consuming any.

use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::Mutex;

use log::{trace, warn};
use slab::Slab;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::IO::{CancelIoEx, OVERLAPPED};

use crate::error::{Error, Result};
use crate::peer_address::SocketAddrKind;

/// How many payload bytes feed a write's dedup signature.
const SIGNATURE_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpType {
    Connect,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CtxState {
    Unused,
    Pending,
}

/// Per-operation context extending `OVERLAPPED` with an owned buffer and
/// bookkeeping. The `OVERLAPPED` must stay first so a completion's
/// overlapped pointer is also a context pointer.
#[repr(C)]
pub(crate) struct OverlappedContext {
    pub(crate) overlapped: OVERLAPPED,
    pub(crate) op: OpType,
    pub(crate) handle: HANDLE,
    pub(crate) buffer: Vec<u8>,
    pub(crate) scheduled: usize,
    pub(crate) signature: u64,
    /// Sender or recipient for datagram I/O.
    pub(crate) address: SocketAddrKind,
    pub(crate) state: CtxState,
}

// An OVERLAPPED is plain data; the raw pointers inside it are owned by the
// pending operation, which the manager serializes.
unsafe impl Send for OverlappedContext {}

impl OverlappedContext {
    pub(crate) fn new() -> OverlappedContext {
        OverlappedContext {
            overlapped: unsafe { std::mem::zeroed() },
            op: OpType::Read,
            handle: 0 as HANDLE,
            buffer: Vec::new(),
            scheduled: 0,
            signature: 0,
            address: SocketAddrKind::Unspec,
            state: CtxState::Unused,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.overlapped = unsafe { std::mem::zeroed() };
        self.buffer.clear();
        self.scheduled = 0;
        self.signature = 0;
        self.address = SocketAddrKind::Unspec;
        self.state = CtxState::Unused;
    }

    /// Is this a zero-byte readability probe?
    pub(crate) fn is_probe(&self) -> bool {
        self.op == OpType::Read && self.scheduled == 0
    }
}

impl fmt::Debug for OverlappedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlappedContext")
            .field("op", &self.op)
            .field("state", &self.state)
            .field("scheduled", &self.scheduled)
            .finish_non_exhaustive()
    }
}

impl Drop for OverlappedContext {
    fn drop(&mut self) {
        if self.state == CtxState::Pending {
            unsafe {
                CancelIoEx(self.handle, &self.overlapped);
            }
        }
    }
}

/// What the manager asks a driver callback to do with a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverlappedAction {
    /// Issue the OS call for the operation described by the context.
    Schedule,
    /// Query progress of the already issued operation.
    CheckProgress,
}

/// Driver callbacks issue the actual OS calls; returning
/// [`Error::Async`] keeps the slot pending, anything else frees it.
pub(crate) type DriverFn<'a> =
    dyn FnMut(OverlappedAction, &mut OverlappedContext) -> Result<usize> + 'a;

/// Pool growth policy: `0` fixed, `-1` double, `n > 0` add n slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GrowPolicy {
    Fixed,
    Double,
    Add(usize),
}

impl GrowPolicy {
    pub(crate) fn from_raw(grow_by: isize) -> GrowPolicy {
        match grow_by {
            0 => GrowPolicy::Fixed,
            n if n < 0 => GrowPolicy::Double,
            n => GrowPolicy::Add(n as usize),
        }
    }
}

struct ManagerInner {
    slots: Slab<Box<OverlappedContext>>,
    /// Insertion-ordered ids of pending contexts.
    order: VecDeque<usize>,
    capacity: usize,
    grow: GrowPolicy,
}

/// The context pool. All operations serialize on an internal mutex.
pub(crate) struct OverlappedManager {
    inner: Mutex<ManagerInner>,
}

impl fmt::Debug for OverlappedManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("overlapped manager poisoned");
        f.debug_struct("OverlappedManager")
            .field("pending", &inner.order.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

/// Hash the first [`SIGNATURE_SIZE`] bytes of a payload. Two writes with
/// the same signature on one handle are considered the same request.
pub(crate) fn write_signature(payload: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    let head = &payload[..payload.len().min(SIGNATURE_SIZE)];
    head.hash(&mut hasher);
    payload.len().hash(&mut hasher);
    hasher.finish()
}

impl OverlappedManager {
    /// A pool that can never hand out a slot is refused.
    pub(crate) fn new(initial: usize, grow_by: isize) -> Result<OverlappedManager> {
        let grow = GrowPolicy::from_raw(grow_by);
        if initial == 0 && grow == GrowPolicy::Fixed {
            return Err(Error::InvalidValue);
        }
        Ok(OverlappedManager {
            inner: Mutex::new(ManagerInner {
                slots: Slab::with_capacity(initial),
                order: VecDeque::new(),
                capacity: initial,
                grow,
            }),
        })
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("overlapped manager poisoned")
            .order
            .len()
    }

    /// Request an operation on `handle`, driving `driver` through schedule
    /// and progress checks per the per-handle contracts.
    pub(crate) fn request(
        &self,
        op: OpType,
        handle: HANDLE,
        payload: Option<&[u8]>,
        driver: &mut DriverFn<'_>,
    ) -> Result<usize> {
        let mut inner = self.inner.lock().expect("overlapped manager poisoned");
        match op {
            OpType::Connect => Self::request_connect(&mut inner, handle, driver),
            OpType::Read => Self::request_read(&mut inner, handle, payload, driver),
            OpType::Write => Self::request_write(&mut inner, handle, payload, driver),
        }
    }

    fn request_connect(
        inner: &mut ManagerInner,
        handle: HANDLE,
        driver: &mut DriverFn<'_>,
    ) -> Result<usize> {
        for &id in &inner.order {
            let ctx = &inner.slots[id];
            if ctx.handle != handle {
                continue;
            }
            return if ctx.op == OpType::Connect {
                // Progress the existing attempt instead of stacking a
                // second one.
                Self::drive(inner, id, OverlappedAction::CheckProgress, driver)
            } else {
                Err(Error::InvalidValue)
            };
        }

        let id = Self::allocate(inner, OpType::Connect, handle, None)?;
        Self::drive(inner, id, OverlappedAction::Schedule, driver)
    }

    fn request_read(
        inner: &mut ManagerInner,
        handle: HANDLE,
        payload: Option<&[u8]>,
        driver: &mut DriverFn<'_>,
    ) -> Result<usize> {
        let wanted = payload.map(|p| p.len()).unwrap_or(0);

        if let Some(id) = inner
            .order
            .iter()
            .copied()
            .find(|&id| inner.slots[id].handle == handle && inner.slots[id].op == OpType::Read)
        {
            if inner.slots[id].is_probe() && wanted > 0 {
                // A real read supersedes the readability probe.
                trace!("cancelling zero-byte probe for real read");
                Self::cancel_slot(inner, id);
            } else {
                return Self::drive(inner, id, OverlappedAction::CheckProgress, driver);
            }
        }

        let id = Self::allocate(inner, OpType::Read, handle, None)?;
        inner.slots[id].scheduled = wanted;
        inner.slots[id].buffer.resize(wanted, 0);
        Self::drive(inner, id, OverlappedAction::Schedule, driver)
    }

    fn request_write(
        inner: &mut ManagerInner,
        handle: HANDLE,
        payload: Option<&[u8]>,
        driver: &mut DriverFn<'_>,
    ) -> Result<usize> {
        let payload = payload.ok_or(Error::InvalidValue)?;
        let signature = write_signature(payload);

        // Check progress on pending writes for this handle; completed ones
        // free their slots, a matching signature means this very request is
        // already in flight.
        let pending: Vec<usize> = inner
            .order
            .iter()
            .copied()
            .filter(|&id| inner.slots[id].handle == handle && inner.slots[id].op == OpType::Write)
            .collect();
        for id in pending {
            if inner.slots[id].signature == signature {
                return Err(Error::RepeatAction);
            }
            let _ = Self::drive(inner, id, OverlappedAction::CheckProgress, driver);
        }

        let id = Self::allocate(inner, OpType::Write, handle, Some(payload))?;
        inner.slots[id].signature = signature;
        Self::drive(inner, id, OverlappedAction::Schedule, driver)
    }

    fn allocate(
        inner: &mut ManagerInner,
        op: OpType,
        handle: HANDLE,
        payload: Option<&[u8]>,
    ) -> Result<usize> {
        if inner.slots.len() >= inner.capacity {
            let grown = match inner.grow {
                GrowPolicy::Fixed => {
                    warn!("overlapped pool exhausted at {} slots", inner.capacity);
                    return Err(Error::NumItems);
                }
                GrowPolicy::Double => inner.capacity.max(1) * 2,
                GrowPolicy::Add(n) => inner.capacity + n,
            };
            trace!("growing overlapped pool {} -> {}", inner.capacity, grown);
            inner.capacity = grown;
        }

        let mut ctx = Box::new(OverlappedContext::new());
        ctx.op = op;
        ctx.handle = handle;
        if let Some(payload) = payload {
            ctx.buffer.extend_from_slice(payload);
            ctx.scheduled = payload.len();
        }
        let id = inner.slots.insert(ctx);
        Ok(id)
    }

    /// Run the driver on a slot; `Async` keeps it pending, everything else
    /// frees it.
    fn drive(
        inner: &mut ManagerInner,
        id: usize,
        action: OverlappedAction,
        driver: &mut DriverFn<'_>,
    ) -> Result<usize> {
        let result = driver(action, &mut inner.slots[id]);
        match result {
            Err(Error::Async) => {
                if inner.slots[id].state != CtxState::Pending {
                    inner.slots[id].state = CtxState::Pending;
                    inner.order.push_back(id);
                }
                Err(Error::Async)
            }
            _ => {
                Self::free_slot(inner, id);
                result
            }
        }
    }

    fn cancel_slot(inner: &mut ManagerInner, id: usize) {
        {
            let ctx = &mut inner.slots[id];
            if ctx.state == CtxState::Pending {
                unsafe {
                    CancelIoEx(ctx.handle, &ctx.overlapped);
                }
                ctx.state = CtxState::Unused;
            }
        }
        Self::free_slot(inner, id);
    }

    fn free_slot(inner: &mut ManagerInner, id: usize) {
        if inner.slots.contains(id) {
            inner.slots[id].state = CtxState::Unused;
            inner.slots.remove(id);
        }
        inner.order.retain(|&other| other != id);
    }

    /// Cancel every in-flight operation on `handle` and free its slots.
    pub(crate) fn cancel_handle(&self, handle: HANDLE) {
        let mut inner = self.inner.lock().expect("overlapped manager poisoned");
        unsafe {
            CancelIoEx(handle, ptr::null());
        }
        let ids: Vec<usize> = inner
            .order
            .iter()
            .copied()
            .filter(|&id| inner.slots[id].handle == handle)
            .collect();
        for id in ids {
            inner.slots[id].state = CtxState::Unused;
            Self::free_slot(&mut inner, id);
        }
    }

    /// Cancel everything. Afterwards no context is pending.
    pub(crate) fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("overlapped manager poisoned");
        let mut handles: Vec<HANDLE> = Vec::new();
        for &id in &inner.order {
            let handle = inner.slots[id].handle;
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }
        for handle in handles {
            unsafe {
                CancelIoEx(handle, ptr::null());
            }
        }
        for (_, ctx) in inner.slots.iter_mut() {
            ctx.state = CtxState::Unused;
        }
        inner.slots.clear();
        inner.order.clear();
    }

}

impl Drop for OverlappedManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fixed_pool_is_rejected() {
        assert!(OverlappedManager::new(0, 0).is_err());
        assert!(OverlappedManager::new(0, -1).is_ok());
        assert!(OverlappedManager::new(4, 0).is_ok());
    }

    #[test]
    fn signatures_differ_by_content_and_length() {
        assert_eq!(write_signature(b"hello"), write_signature(b"hello"));
        assert_ne!(write_signature(b"hello"), write_signature(b"world"));

        // Payloads agreeing on the hashed head still differ by length.
        let long_a = vec![7u8; 100];
        let long_b = vec![7u8; 200];
        assert_ne!(write_signature(&long_a), write_signature(&long_b));
    }

    #[test]
    fn pending_count_tracks_async_driver_results() {
        let manager = OverlappedManager::new(4, 0).unwrap();
        let handle = 1 as HANDLE;

        // Driver leaves the operation pending.
        let mut driver = |action: OverlappedAction, ctx: &mut OverlappedContext| {
            assert_eq!(action, OverlappedAction::Schedule);
            assert_eq!(ctx.op, OpType::Write);
            Err(Error::Async)
        };
        let res = manager.request(OpType::Write, handle, Some(b"payload"), &mut driver);
        assert_eq!(res, Err(Error::Async));
        assert_eq!(manager.pending_count(), 1);

        // The same payload is deduplicated by signature.
        let mut second = |_: OverlappedAction, _: &mut OverlappedContext| -> Result<usize> {
            panic!("duplicate write must not reach the driver");
        };
        let res = manager.request(OpType::Write, handle, Some(b"payload"), &mut second);
        assert_eq!(res, Err(Error::RepeatAction));
        assert_eq!(manager.pending_count(), 1);

        manager.cancel_all();
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn second_connect_checks_progress() {
        let manager = OverlappedManager::new(2, 0).unwrap();
        let handle = 5 as HANDLE;

        let mut schedule = |action: OverlappedAction, _: &mut OverlappedContext| {
            assert_eq!(action, OverlappedAction::Schedule);
            Err(Error::Async)
        };
        assert_eq!(
            manager.request(OpType::Connect, handle, None, &mut schedule),
            Err(Error::Async)
        );

        let mut check = |action: OverlappedAction, _: &mut OverlappedContext| {
            assert_eq!(action, OverlappedAction::CheckProgress);
            Ok(0)
        };
        assert_eq!(manager.request(OpType::Connect, handle, None, &mut check), Ok(0));
        assert_eq!(manager.pending_count(), 0);
    }
}
