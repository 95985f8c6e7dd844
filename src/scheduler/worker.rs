//! Worker tasklets.
//!
//! A worker sleeps on the pool condition, wakes when the main loop posts a
//! batch, drains the out-queue entry by entry and goes back to sleep.
//! Callback panics are caught and logged; the worker survives them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, warn};

use crate::callback::CallbackContext;
use crate::error::{Error, Result};
use crate::event::Events;

use super::entry::{CallbackEntry, EntryKind};
use super::Inner;

/// Invoke one entry's callback with the context its kind dictates.
pub(crate) fn execute_entry(entry: &CallbackEntry) -> Result<()> {
    let callback = entry.callback.as_ref().ok_or(Error::EmptyCallback)?;

    let (events, connector) = match &entry.kind {
        EntryKind::Io { connector, events } => (*events, Some(connector.clone())),
        EntryKind::Scheduled { .. } => (Events::TIMEOUT, None),
        EntryKind::User { events } => (*events, None),
    };

    let ctx = CallbackContext {
        now: entry.timestamp.unwrap_or_else(Instant::now),
        events,
        connector,
    };
    callback.invoke(&ctx)
}

/// Invoke an entry, converting panics into [`Error::Unexpected`].
pub(crate) fn handle_entry(entry: &CallbackEntry) -> Result<()> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| execute_entry(entry)));
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            debug!("callback returned {}", err);
            Err(err)
        }
        Err(_) => {
            warn!("callback panicked");
            Err(Error::Unexpected)
        }
    }
}

/// Pop and invoke entries until the queue runs dry.
///
/// With `exit_on_failure`, the first failing callback stops invocation;
/// later entries in the batch are still consumed and dropped.
pub(crate) fn drain_work_queue(inner: &Inner, exit_on_failure: bool) -> Result<()> {
    let mut result = Ok(());
    let mut process = true;
    while let Some(entry) = inner.out_queue.pop() {
        if process {
            if let Err(err) = handle_entry(&entry) {
                result = Err(err);
                if exit_on_failure {
                    process = false;
                }
            }
        }
    }
    result
}

pub(crate) fn spawn(id: usize, inner: Arc<Inner>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("crossbar-worker-{}", id))
        .spawn(move || {
            debug!("worker {} started", id);
            loop {
                {
                    let mut guard = inner.wake_lock.lock().expect("worker lock poisoned");
                    while inner.running.load(Ordering::Acquire) && inner.out_queue.is_empty() {
                        guard = inner
                            .wake_cond
                            .wait(guard)
                            .expect("worker condition poisoned");
                    }
                }
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                let _ = drain_work_queue(&inner, false);
            }
            debug!("worker {} stopped", id);
        })
        .expect("could not spawn worker thread")
}
