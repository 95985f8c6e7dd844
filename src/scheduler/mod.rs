//! The reactor style scheduler.
//!
//! The scheduler dispatches three event categories to callbacks: I/O
//! readiness on connectors, timed callbacks, and user-defined events fired
//! through [`Scheduler::fire_events`]. Work happens on a dedicated main
//! loop thread plus a pool of workers; with a worker count of zero the
//! caller drives everything synchronously via
//! [`Scheduler::process_events`].
//!
//! Every public operation enqueues a command and wakes the main loop by
//! writing a byte to an internal loopback connector. The main loop drains
//! commands into its containers, waits on the multiplexor bounded by the
//! nearest scheduled deadline, matches fired events against registrations
//! and posts ready callbacks to the worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};

use crate::api::Api;
use crate::callback::Callback;
use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::event::Events;
use crate::mux::{self, Multiplexor, MuxType};

mod containers;
mod entry;
mod queue;
mod worker;

use containers::{IoCallbacks, SchedRecord, ScheduledCallbacks, UserCallbacks};
use entry::{Action, CallbackEntry, EntryKind};
use queue::ConcurrentQueue;

/// Fallback worker count when hardware concurrency cannot be detected.
const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound on a single multiplexor wait in the main loop. Interrupts
/// cut waits short, so this only caps how long a lost wakeup could stall
/// the loop.
const MAX_WAIT: Duration = Duration::from_millis(250);

/// Default lower bound for waits, avoiding busy-spin on tight deadlines.
const DEFAULT_WAIT_FLOOR: Duration = Duration::from_micros(20);

/// Scheduler construction parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. `-1` detects hardware concurrency, `0`
    /// disables background processing in favour of
    /// [`Scheduler::process_events`].
    pub workers: isize,
    /// Which multiplexor backend to use.
    pub mux: MuxType,
    /// Minimum multiplexor wait. Must be positive.
    pub wait_floor: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            workers: -1,
            mux: MuxType::Automatic,
            wait_floor: DEFAULT_WAIT_FLOOR,
        }
    }
}

/// State owned by the main loop (or, with zero workers, borrowed by
/// `process_events`). Nothing else touches it.
struct LoopState {
    mux: Box<dyn Multiplexor>,
    io: IoCallbacks,
    scheduled: ScheduledCallbacks,
    user: UserCallbacks,
}

pub(crate) struct Inner {
    in_queue: ConcurrentQueue<(Action, CallbackEntry)>,
    pub(crate) out_queue: ConcurrentQueue<CallbackEntry>,
    pub(crate) running: AtomicBool,
    dead: AtomicBool,
    pub(crate) wake_lock: Mutex<()>,
    pub(crate) wake_cond: Condvar,
    interrupt: Connector,
    loop_state: Mutex<LoopState>,
    wait_floor: Duration,
    worker_count: usize,
}

/// The event scheduler.
///
/// Dropping the scheduler is the sole cancellation mechanism: workers and
/// the main loop are stopped and joined, the interrupt connector is closed
/// and undelivered entries are discarded.
pub struct Scheduler {
    inner: Arc<Inner>,
    main_thread: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler with the default (automatic) multiplexor.
    pub fn new(api: &Arc<Api>, workers: isize) -> Result<Scheduler> {
        Scheduler::with_config(
            api,
            SchedulerConfig {
                workers,
                ..SchedulerConfig::default()
            },
        )
    }

    pub fn with_config(api: &Arc<Api>, config: SchedulerConfig) -> Result<Scheduler> {
        if config.wait_floor.is_zero() {
            return Err(Error::InvalidValue);
        }

        let worker_count = match config.workers {
            n if n < 0 => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_CONCURRENCY),
            n => n as usize,
        };

        let mut mux = mux::create(config.mux)?;

        let interrupt = Connector::new(api, "anon://")?;
        interrupt.connect()?;
        mux.register_connector(
            &interrupt,
            Events::IO_READ | Events::IO_ERROR | Events::IO_CLOSE,
        )?;
        trace!("scheduler interrupt connector is {}", interrupt);

        let inner = Arc::new(Inner {
            in_queue: ConcurrentQueue::new(),
            out_queue: ConcurrentQueue::new(),
            running: AtomicBool::new(true),
            dead: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cond: Condvar::new(),
            interrupt,
            loop_state: Mutex::new(LoopState {
                mux,
                io: IoCallbacks::new(),
                scheduled: ScheduledCallbacks::new(),
                user: UserCallbacks::new(),
            }),
            wait_floor: config.wait_floor,
            worker_count,
        });

        let mut scheduler = Scheduler {
            inner,
            main_thread: None,
            workers: Vec::new(),
        };

        if worker_count > 0 {
            let loop_inner = Arc::clone(&scheduler.inner);
            scheduler.main_thread = Some(
                thread::Builder::new()
                    .name("crossbar-main-loop".to_string())
                    .spawn(move || main_loop(loop_inner))
                    .expect("could not spawn scheduler main loop"),
            );
            for id in 0..worker_count {
                scheduler
                    .workers
                    .push(worker::spawn(id, Arc::clone(&scheduler.inner)));
            }
            debug!("scheduler started with {} worker(s)", worker_count);
        } else {
            debug!("scheduler in process_events mode");
        }

        Ok(scheduler)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn enqueue(&self, action: Action, entry: CallbackEntry) {
        self.inner.in_queue.push((action, entry));
        self.inner.commit();
    }

    /// Register `callback` for `events` on `conn`.
    pub fn register_connector(
        &self,
        events: Events,
        conn: &Connector,
        callback: &Callback,
    ) -> Result<()> {
        let entry = CallbackEntry::new(
            EntryKind::Io {
                connector: conn.clone(),
                events,
            },
            Some(callback.clone()),
        );
        self.enqueue(Action::Add, entry);
        Ok(())
    }

    /// Remove `events` from the registration of `(conn, callback)`.
    pub fn unregister_connector(
        &self,
        events: Events,
        conn: &Connector,
        callback: &Callback,
    ) -> Result<()> {
        let entry = CallbackEntry::new(
            EntryKind::Io {
                connector: conn.clone(),
                events,
            },
            Some(callback.clone()),
        );
        self.enqueue(Action::Remove, entry);
        Ok(())
    }

    /// Remove `events` from every callback registered on `conn`.
    pub fn unregister_connector_events(&self, events: Events, conn: &Connector) -> Result<()> {
        let entry = CallbackEntry::new(
            EntryKind::Io {
                connector: conn.clone(),
                events,
            },
            None,
        );
        self.enqueue(Action::Remove, entry);
        Ok(())
    }

    /// Remove every registration of `conn`.
    pub fn unregister_connector_all(&self, conn: &Connector) -> Result<()> {
        self.unregister_connector_events(Events::ALL_BUILTIN, conn)
    }

    /// Invoke `callback` once, `delay` from now.
    pub fn schedule_once(&self, delay: Duration, callback: &Callback) -> Result<()> {
        self.schedule_entry(Instant::now() + delay, None, None, callback)
    }

    /// Invoke `callback` once at `time`.
    pub fn schedule_at(&self, time: Instant, callback: &Callback) -> Result<()> {
        self.schedule_entry(time, None, None, callback)
    }

    /// Invoke `callback` at `first` and then every `interval`, forever.
    pub fn schedule(&self, first: Instant, interval: Duration, callback: &Callback) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidValue);
        }
        self.schedule_entry(first, Some(interval), None, callback)
    }

    /// Invoke `callback` at `first` and then every `interval`, `count`
    /// times in total.
    pub fn schedule_count(
        &self,
        first: Instant,
        interval: Duration,
        count: u64,
        callback: &Callback,
    ) -> Result<()> {
        if interval.is_zero() || count == 0 {
            return Err(Error::InvalidValue);
        }
        self.schedule_entry(first, Some(interval), Some(count), callback)
    }

    fn schedule_entry(
        &self,
        deadline: Instant,
        interval: Option<Duration>,
        remaining: Option<u64>,
        callback: &Callback,
    ) -> Result<()> {
        let entry = CallbackEntry::new(
            EntryKind::Scheduled {
                deadline,
                interval,
                remaining,
            },
            Some(callback.clone()),
        );
        self.enqueue(Action::Add, entry);
        Ok(())
    }

    /// Remove every scheduled entry for `callback`.
    pub fn unschedule(&self, callback: &Callback) -> Result<()> {
        let entry = CallbackEntry::new(
            EntryKind::Scheduled {
                deadline: Instant::now(),
                interval: None,
                remaining: None,
            },
            Some(callback.clone()),
        );
        self.enqueue(Action::Remove, entry);
        Ok(())
    }

    /// Register `callback` for the user-defined bits in `events`.
    pub fn register_event(&self, events: Events, callback: &Callback) -> Result<()> {
        if !events.has_user_bits() {
            return Err(Error::InvalidValue);
        }
        let entry = CallbackEntry::new(EntryKind::User { events }, Some(callback.clone()));
        self.enqueue(Action::Add, entry);
        Ok(())
    }

    pub fn unregister_event(&self, events: Events, callback: &Callback) -> Result<()> {
        let entry = CallbackEntry::new(EntryKind::User { events }, Some(callback.clone()));
        self.enqueue(Action::Remove, entry);
        Ok(())
    }

    /// Fire user-defined events. The mask must contain at least one user
    /// bit.
    pub fn fire_events(&self, events: Events) -> Result<()> {
        if !events.has_user_bits() {
            return Err(Error::InvalidValue);
        }
        let entry = CallbackEntry::new(EntryKind::User { events }, None);
        self.enqueue(Action::Trigger, entry);
        Ok(())
    }

    /// Run one main loop iteration synchronously and invoke the resulting
    /// callbacks on the calling thread.
    ///
    /// Only valid with a worker count of zero. Returns the number of
    /// callbacks invoked, or [`Error::Timeout`] if the wait produced no
    /// work. `soft_timeout` lets the wait shrink to the nearest scheduled
    /// deadline; `exit_on_failure` stops invoking after the first failing
    /// callback (the rest of the batch is discarded).
    pub fn process_events(
        &self,
        timeout: Duration,
        soft_timeout: bool,
        exit_on_failure: bool,
    ) -> Result<usize> {
        if self.inner.worker_count != 0 {
            return Err(Error::InvalidValue);
        }
        if self.inner.dead.load(Ordering::Acquire) {
            return Err(Error::Unexpected);
        }

        let mut batch = Vec::new();
        {
            let mut ls = self.inner.loop_state.lock().expect("loop state poisoned");
            if let Err(err) = self
                .inner
                .wait_for_events(&mut ls, timeout, soft_timeout, &mut batch)
            {
                error!("event processing failed: {}", err);
                self.inner.dead.store(true, Ordering::Release);
                return Err(err);
            }
        }

        if batch.is_empty() {
            return Err(Error::Timeout);
        }

        let count = batch.len();
        let mut process = true;
        for entry in &batch {
            if !process {
                continue;
            }
            if worker::handle_entry(entry).is_err() && exit_on_failure {
                process = false;
            }
        }
        Ok(count)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        debug!("shutting down scheduler");
        self.inner.running.store(false, Ordering::Release);

        // Take the wake lock once so no worker can be between its check
        // and its wait when the broadcast goes out.
        drop(self.inner.wake_lock.lock().expect("worker lock poisoned"));
        self.inner.wake_cond.notify_all();
        self.inner.commit();

        if let Some(handle) = self.main_thread.take() {
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        if let Ok(mut ls) = self.inner.loop_state.lock() {
            let _ = ls.mux.unregister_connector(&self.inner.interrupt, Events::NONE);
        }
        if let Err(err) = self.inner.interrupt.close() {
            warn!("could not close interrupt connector: {}", err);
        }

        // Discard anything still queued.
        while self.inner.in_queue.pop().is_some() {}
        while self.inner.out_queue.pop().is_some() {}
    }
}

impl Inner {
    /// Wake the main loop after enqueuing.
    fn commit(&self) {
        if let Err(err) = self.interrupt.write(&[0]) {
            // A full pipe still wakes the loop; anything else is logged.
            if err != Error::Async {
                warn!("could not interrupt main loop: {}", err);
            }
        }
    }

    fn drain_interrupt(&self) {
        let mut buf = [0u8; 64];
        loop {
            match self.interrupt.read(&mut buf) {
                Ok(n) if n > 0 => continue,
                _ => break,
            }
        }
    }

    /// Drain the in-queue into the containers. Trigger actions for user
    /// events are collected for the dispatch stage.
    fn process_in_queue(&self, ls: &mut LoopState, triggered: &mut Vec<Events>) -> Result<()> {
        while let Some((action, entry)) = self.in_queue.pop() {
            match (action, entry.kind) {
                (Action::Add, EntryKind::Io { connector, events }) => {
                    let Some(callback) = entry.callback else {
                        warn!("ignoring I/O registration without callback");
                        continue;
                    };
                    ls.io.add(&connector, callback, events);
                    ls.mux.register_connector(&connector, events)?;
                }
                (Action::Remove, EntryKind::Io { connector, events }) => {
                    let still_wanted = ls.io.remove(&connector, entry.callback.as_ref(), events);
                    let to_drop = events - still_wanted;
                    if !to_drop.is_empty() {
                        ls.mux.unregister_connector(&connector, to_drop)?;
                    }
                }

                (
                    Action::Add,
                    EntryKind::Scheduled {
                        deadline,
                        interval,
                        remaining,
                    },
                ) => {
                    let Some(callback) = entry.callback else {
                        warn!("ignoring scheduled registration without callback");
                        continue;
                    };
                    ls.scheduled.add(
                        deadline,
                        SchedRecord {
                            callback,
                            interval,
                            remaining,
                        },
                    );
                }
                (Action::Remove, EntryKind::Scheduled { .. }) => {
                    if let Some(callback) = entry.callback {
                        ls.scheduled.remove(&callback);
                    }
                }

                (Action::Add, EntryKind::User { events }) => {
                    let Some(callback) = entry.callback else {
                        warn!("ignoring user event registration without callback");
                        continue;
                    };
                    ls.user.add(callback, events);
                }
                (Action::Remove, EntryKind::User { events }) => {
                    if let Some(callback) = entry.callback {
                        ls.user.remove(&callback, events);
                    }
                }
                (Action::Trigger, EntryKind::User { events }) => {
                    triggered.push(events);
                }

                (Action::Trigger, _) => {
                    warn!("ignoring trigger action for non-user entry");
                }
            }
        }
        Ok(())
    }

    /// One scheduler iteration: drain commands, wait, collect ready
    /// callbacks into `result` stamped with the dispatch time.
    fn wait_for_events(
        &self,
        ls: &mut LoopState,
        timeout: Duration,
        soft_timeout: bool,
        result: &mut Vec<CallbackEntry>,
    ) -> Result<()> {
        let mut triggered = Vec::new();
        self.process_in_queue(ls, &mut triggered)?;

        // Bound the wait by the nearest scheduled deadline, clamped from
        // below to avoid busy-spinning on imminent deadlines.
        let mut selected = timeout;
        if soft_timeout {
            if let Some(deadline) = ls.scheduled.next_deadline() {
                selected = selected.min(deadline.saturating_duration_since(Instant::now()));
            }
        }
        selected = selected.max(self.wait_floor);

        let events = ls.mux.wait(selected)?;
        let now = Instant::now();

        // Multiple events for one connector merge into a single callback
        // invocation.
        let mut merged: Vec<(Connector, Events)> = Vec::new();
        for event in events {
            if event.connector == self.interrupt {
                self.drain_interrupt();
                continue;
            }
            match merged.iter_mut().find(|(conn, _)| *conn == event.connector) {
                Some(slot) => slot.1 |= event.events,
                None => merged.push((event.connector, event.events)),
            }
        }

        for (connector, events) in merged {
            for (callback, mask) in ls.io.copy_matching(&connector, events) {
                result.push(CallbackEntry {
                    kind: EntryKind::Io {
                        connector: connector.clone(),
                        events: mask,
                    },
                    callback: Some(callback),
                    timestamp: Some(now),
                });
            }
        }

        for (deadline, record) in ls.scheduled.pull_due(now) {
            let next_remaining = record.remaining.map(|n| n.saturating_sub(1));
            result.push(CallbackEntry {
                kind: EntryKind::Scheduled {
                    deadline,
                    interval: record.interval,
                    remaining: next_remaining,
                },
                callback: Some(record.callback.clone()),
                timestamp: Some(now),
            });

            // Periodic entries reschedule unless this was the final
            // invocation.
            if let Some(interval) = record.interval {
                if next_remaining != Some(0) {
                    ls.scheduled.add(
                        deadline + interval,
                        SchedRecord {
                            callback: record.callback,
                            interval: record.interval,
                            remaining: next_remaining,
                        },
                    );
                }
            }
        }

        for events in triggered {
            for (callback, mask) in ls.user.copy_matching(events) {
                result.push(CallbackEntry {
                    kind: EntryKind::User { events: mask },
                    callback: Some(callback),
                    timestamp: Some(now),
                });
            }
        }

        if !result.is_empty() {
            trace!("dispatching {} callback(s)", result.len());
        }
        Ok(())
    }
}

fn main_loop(inner: Arc<Inner>) {
    debug!("scheduler main loop started");
    while inner.running.load(Ordering::Acquire) {
        let mut batch = Vec::new();
        let res = {
            let mut ls = inner.loop_state.lock().expect("loop state poisoned");
            inner.wait_for_events(&mut ls, MAX_WAIT, true, &mut batch)
        };
        if let Err(err) = res {
            error!("scheduler main loop terminating: {}", err);
            inner.dead.store(true, Ordering::Release);
            break;
        }
        if batch.is_empty() {
            continue;
        }

        // Wake no more workers than there are batch entries.
        let count = batch.len();
        inner.out_queue.push_batch(batch);
        for _ in 0..count.min(inner.worker_count) {
            inner.wake_cond.notify_one();
        }
    }
    debug!("scheduler main loop finished");
}
