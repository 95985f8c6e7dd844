//! The three callback containers, owned exclusively by the main loop.
//!
//! Each is specialized for its lookup pattern: I/O callbacks key on the
//! connector, scheduled callbacks order by deadline, user callbacks key on
//! callback identity and filter by event mask. Deduplication everywhere is
//! by callback identity (see `Callback`); adding an existing callback
//! merges event masks, removing subtracts them, and a record vanishes when
//! its mask runs empty.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::callback::Callback;
use crate::connector::Connector;
use crate::event::Events;

/// I/O callbacks: a multi-map from connector to (callback, mask) records.
#[derive(Debug, Default)]
pub(crate) struct IoCallbacks {
    map: HashMap<Connector, Vec<IoRecord>>,
}

#[derive(Debug)]
struct IoRecord {
    callback: Callback,
    events: Events,
}

impl IoCallbacks {
    pub(crate) fn new() -> IoCallbacks {
        IoCallbacks::default()
    }

    /// Merge `events` into the record for `(connector, callback)`, creating
    /// it if needed.
    pub(crate) fn add(&mut self, conn: &Connector, callback: Callback, events: Events) {
        let records = self.map.entry(conn.clone()).or_default();
        if let Some(record) = records.iter_mut().find(|r| r.callback == callback) {
            record.events |= events;
        } else {
            records.push(IoRecord { callback, events });
        }
    }

    /// Subtract `events` from matching records and drop the ones left
    /// empty. With no callback given, every record of the connector is
    /// affected.
    ///
    /// Returns the union of events still wanted for the connector, so the
    /// caller can narrow the multiplexor registration.
    pub(crate) fn remove(
        &mut self,
        conn: &Connector,
        callback: Option<&Callback>,
        events: Events,
    ) -> Events {
        let mut remaining = Events::NONE;
        if let Some(records) = self.map.get_mut(conn) {
            records.retain_mut(|record| {
                let matches = callback.map(|cb| *cb == record.callback).unwrap_or(true);
                if matches {
                    record.events -= events;
                }
                remaining |= record.events;
                !record.events.is_empty()
            });
            if records.is_empty() {
                self.map.remove(conn);
            }
        }
        remaining
    }

    /// Clone out all records whose mask intersects `events`, with the
    /// masks narrowed to the intersection.
    pub(crate) fn copy_matching(&self, conn: &Connector, events: Events) -> Vec<(Callback, Events)> {
        let mut result = Vec::new();
        if let Some(records) = self.map.get(conn) {
            for record in records {
                let masked = record.events & events;
                if !masked.is_empty() {
                    result.push((record.callback.clone(), masked));
                }
            }
        }
        result
    }
}

/// A scheduled record: callback plus repetition state.
#[derive(Debug, Clone)]
pub(crate) struct SchedRecord {
    pub(crate) callback: Callback,
    /// `None` marks a one-shot entry.
    pub(crate) interval: Option<Duration>,
    /// `None` means unlimited repeats.
    pub(crate) remaining: Option<u64>,
}

/// Scheduled callbacks, ordered by deadline with insertion-order tie
/// break.
///
/// The same callback may be scheduled at several deadlines; removal by
/// callback drops all of them.
#[derive(Debug, Default)]
pub(crate) struct ScheduledCallbacks {
    entries: BTreeMap<(Instant, u64), SchedRecord>,
    seq: u64,
}

impl ScheduledCallbacks {
    pub(crate) fn new() -> ScheduledCallbacks {
        ScheduledCallbacks::default()
    }

    pub(crate) fn add(&mut self, deadline: Instant, record: SchedRecord) {
        let seq = self.seq;
        self.seq += 1;
        self.entries.insert((deadline, seq), record);
    }

    pub(crate) fn remove(&mut self, callback: &Callback) {
        self.entries.retain(|_, record| record.callback != *callback);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every entry with `deadline <= now`, in deadline
    /// order.
    pub(crate) fn pull_due(&mut self, now: Instant) -> Vec<(Instant, SchedRecord)> {
        let mut due = Vec::new();
        while let Some((key, _)) = self.entries.first_key_value() {
            if key.0 > now {
                break;
            }
            let (key, record) = self.entries.pop_first().expect("checked non-empty");
            due.push((key.0, record));
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// User event callbacks: one record per callback identity.
#[derive(Debug, Default)]
pub(crate) struct UserCallbacks {
    map: HashMap<Callback, Events>,
}

impl UserCallbacks {
    pub(crate) fn new() -> UserCallbacks {
        UserCallbacks::default()
    }

    pub(crate) fn add(&mut self, callback: Callback, events: Events) {
        *self.map.entry(callback).or_insert(Events::NONE) |= events;
    }

    pub(crate) fn remove(&mut self, callback: &Callback, events: Events) {
        if let Some(mask) = self.map.get_mut(callback) {
            *mask -= events;
            if mask.is_empty() {
                self.map.remove(callback);
            }
        }
    }

    /// Clone out all callbacks interested in any bit of `events`.
    pub(crate) fn copy_matching(&self, events: Events) -> Vec<(Callback, Events)> {
        let mut result = Vec::new();
        for (callback, mask) in &self.map {
            let masked = *mask & events;
            if !masked.is_empty() {
                result.push((callback.clone(), masked));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb() -> Callback {
        Callback::new(|_| Ok(()))
    }

    mod io {
        use super::*;

        #[test]
        fn add_merges_masks_per_callback() {
            let conn = Connector::default();
            let callback = cb();
            let mut io = IoCallbacks::new();

            io.add(&conn, callback.clone(), Events::IO_READ);
            io.add(&conn, callback.clone(), Events::IO_WRITE);

            let matches = io.copy_matching(&conn, Events::IO_READ | Events::IO_WRITE);
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].1, Events::IO_READ | Events::IO_WRITE);
        }

        #[test]
        fn distinct_callbacks_stay_distinct() {
            let conn = Connector::default();
            let mut io = IoCallbacks::new();
            io.add(&conn, cb(), Events::IO_READ);
            io.add(&conn, cb(), Events::IO_READ);

            assert_eq!(io.copy_matching(&conn, Events::IO_READ).len(), 2);
        }

        #[test]
        fn remove_subtracts_and_deletes() {
            let conn = Connector::default();
            let callback = cb();
            let mut io = IoCallbacks::new();
            io.add(&conn, callback.clone(), Events::IO_READ | Events::IO_WRITE);

            let remaining = io.remove(&conn, Some(&callback), Events::IO_READ);
            assert_eq!(remaining, Events::IO_WRITE);
            assert!(io.copy_matching(&conn, Events::IO_READ).is_empty());
            assert_eq!(io.copy_matching(&conn, Events::IO_WRITE).len(), 1);

            let remaining = io.remove(&conn, Some(&callback), Events::IO_WRITE);
            assert!(remaining.is_empty());
            assert!(io.copy_matching(&conn, Events::ALL_BUILTIN).is_empty());
        }

        #[test]
        fn remove_without_callback_hits_all_records() {
            let conn = Connector::default();
            let mut io = IoCallbacks::new();
            io.add(&conn, cb(), Events::IO_READ);
            io.add(&conn, cb(), Events::IO_READ | Events::IO_WRITE);

            let remaining = io.remove(&conn, None, Events::IO_READ);
            assert_eq!(remaining, Events::IO_WRITE);
        }

        #[test]
        fn copy_matching_narrows_masks() {
            let conn = Connector::default();
            let mut io = IoCallbacks::new();
            io.add(&conn, cb(), Events::IO_READ | Events::IO_WRITE);

            let matches = io.copy_matching(&conn, Events::IO_READ);
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].1, Events::IO_READ);
        }
    }

    mod scheduled {
        use super::*;

        fn record() -> SchedRecord {
            SchedRecord {
                callback: cb(),
                interval: None,
                remaining: None,
            }
        }

        #[test]
        fn ordered_by_deadline_with_insertion_tie_break() {
            let now = Instant::now();
            let mut sched = ScheduledCallbacks::new();

            let first = record();
            let second = record();
            let third = record();
            sched.add(now + Duration::from_millis(5), first.clone());
            sched.add(now + Duration::from_millis(1), second.clone());
            sched.add(now + Duration::from_millis(5), third.clone());

            let due = sched.pull_due(now + Duration::from_millis(10));
            assert_eq!(due.len(), 3);
            assert_eq!(due[0].1.callback, second.callback);
            assert_eq!(due[1].1.callback, first.callback);
            assert_eq!(due[2].1.callback, third.callback);
        }

        #[test]
        fn pull_due_leaves_future_entries() {
            let now = Instant::now();
            let mut sched = ScheduledCallbacks::new();
            sched.add(now, record());
            sched.add(now + Duration::from_secs(60), record());

            let due = sched.pull_due(now);
            assert_eq!(due.len(), 1);
            assert_eq!(sched.len(), 1);
            assert_eq!(sched.next_deadline().unwrap(), now + Duration::from_secs(60));
        }

        #[test]
        fn same_callback_twice_is_two_entries() {
            let now = Instant::now();
            let callback = cb();
            let mut sched = ScheduledCallbacks::new();
            sched.add(
                now,
                SchedRecord {
                    callback: callback.clone(),
                    interval: None,
                    remaining: None,
                },
            );
            sched.add(
                now + Duration::from_millis(1),
                SchedRecord {
                    callback: callback.clone(),
                    interval: None,
                    remaining: None,
                },
            );
            assert_eq!(sched.len(), 2);

            // Removal by callback drops both.
            sched.remove(&callback);
            assert_eq!(sched.len(), 0);
        }
    }

    mod user {
        use super::*;

        #[test]
        fn add_merges_remove_subtracts() {
            let callback = cb();
            let mut user = UserCallbacks::new();
            user.add(callback.clone(), Events::user(0));
            user.add(callback.clone(), Events::user(1));

            let matches = user.copy_matching(Events::user(0) | Events::user(1));
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].1, Events::user(0) | Events::user(1));

            user.remove(&callback, Events::user(0));
            assert!(user.copy_matching(Events::user(0)).is_empty());
            assert_eq!(user.copy_matching(Events::user(1)).len(), 1);

            user.remove(&callback, Events::user(1));
            assert!(user.copy_matching(Events::ALL_USER).is_empty());
        }

        #[test]
        fn lookup_filters_by_intersection() {
            let a = cb();
            let b = cb();
            let mut user = UserCallbacks::new();
            user.add(a.clone(), Events::user(1));
            user.add(b.clone(), Events::user(1) | Events::user(2));

            let matches = user.copy_matching(Events::user(2));
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].0, b);

            let matches = user.copy_matching(Events::user(1));
            assert_eq!(matches.len(), 2);
        }
    }
}
