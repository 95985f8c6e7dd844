use std::time::{Duration, Instant};

use crate::callback::Callback;
use crate::connector::Connector;
use crate::event::Events;

/// What to do with an entry travelling through the in-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Add,
    Remove,
    Trigger,
}

/// The three callback registration shapes.
#[derive(Debug, Clone)]
pub(crate) enum EntryKind {
    Io {
        connector: Connector,
        events: Events,
    },
    Scheduled {
        deadline: Instant,
        /// `None` marks a one-shot entry.
        interval: Option<Duration>,
        /// `None` means unlimited repeats.
        remaining: Option<u64>,
    },
    User {
        events: Events,
    },
}

/// A callback bundled with dispatch information.
///
/// Ownership transfers with the entry: whichever queue or container holds
/// it frees it, and workers drop entries after invocation.
#[derive(Debug, Clone)]
pub(crate) struct CallbackEntry {
    pub(crate) kind: EntryKind,
    /// Absent for remove actions that target every matching callback.
    pub(crate) callback: Option<Callback>,
    /// Stamped by the main loop just before dispatch.
    pub(crate) timestamp: Option<Instant>,
}

impl CallbackEntry {
    pub(crate) fn new(kind: EntryKind, callback: Option<Callback>) -> CallbackEntry {
        CallbackEntry {
            kind,
            callback,
            timestamp: None,
        }
    }
}
