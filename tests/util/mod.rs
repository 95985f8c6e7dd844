// Not all functions are used by all tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Once, OnceLock};
use std::time::{Duration, Instant};

use rand::Rng;

use crossbar::{Api, Connector, Error, Result, Scheduler};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub fn init_with_api() -> Arc<Api> {
    init();
    Api::new().expect("unable to create api instance")
}

/// A port range unlikely to collide across test processes: a random base
/// slot per process, plus a counter so allocations within the process
/// never overlap.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);

fn port_slot() -> u16 {
    static SLOT: OnceLock<u16> = OnceLock::new();
    *SLOT.get_or_init(|| rand::rng().random_range(0..512))
}

pub fn ephemeral_port_base(span: u16) -> u16 {
    let offset = NEXT_PORT.fetch_add(span, Ordering::Relaxed);
    40_000 + port_slot() * 40 + offset
}

/// Bind a fresh UDP connector somewhere in the test port range, retrying
/// on collisions with other processes.
pub fn bound_udp(api: &Arc<Api>, extra_query: &str) -> (Connector, u16) {
    for _ in 0..32 {
        let port = ephemeral_port_base(1);
        let url = format!("udp4://127.0.0.1:{}{}", port, extra_query);
        let conn = Connector::new(api, &url).expect("unable to create udp connector");
        match conn.listen() {
            Ok(()) => return (conn, port),
            Err(Error::AddressInUse) => continue,
            Err(err) => panic!("unexpected listen error: {}", err),
        }
    }
    panic!("could not find a free udp port");
}

/// Listen on a fresh TCP port, returning the listener and its port.
pub fn bound_tcp(api: &Arc<Api>, extra_query: &str) -> (Connector, u16) {
    for _ in 0..32 {
        let port = ephemeral_port_base(1);
        let url = format!("tcp4://127.0.0.1:{}{}", port, extra_query);
        let conn = Connector::new(api, &url).expect("unable to create tcp connector");
        match conn.listen() {
            Ok(()) => return (conn, port),
            Err(Error::AddressInUse) => continue,
            Err(err) => panic!("unexpected listen error: {}", err),
        }
    }
    panic!("could not find a free tcp port");
}

/// Drive a process_events scheduler until `done` reports true or the
/// deadline passes. Timeouts from empty iterations are fine; any other
/// error fails the test.
pub fn pump_until(scheduler: &Scheduler, limit: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        match scheduler.process_events(Duration::from_millis(20), true, false) {
            Ok(_) | Err(Error::Timeout) => {}
            Err(err) => panic!("process_events failed: {}", err),
        }
    }
}

/// Read exactly `n` bytes from a connector, polling through short reads.
pub fn read_exact(conn: &Connector, n: usize, limit: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + limit;
    let mut collected = Vec::with_capacity(n);
    let mut buf = vec![0u8; n];
    while collected.len() < n {
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }
        match conn.read(&mut buf[..n - collected.len()]) {
            Ok(0) => std::thread::sleep(Duration::from_millis(1)),
            Ok(got) => collected.extend_from_slice(&buf[..got]),
            Err(Error::Async) | Err(Error::RepeatAction) => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Err(err) => return Err(err),
        }
    }
    Ok(collected)
}

pub fn assert_send<T: Send>() {}
pub fn assert_sync<T: Sync>() {}
