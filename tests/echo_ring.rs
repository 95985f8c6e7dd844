//! The UDP echo ring conformance workload: n datagram connectors bound in
//! a ring, each forwarding a single byte to its successor until a write
//! budget is spent. Scaled down from the benchmark's defaults to suit CI.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbar::{Callback, Connector, Error, Events, Scheduler, SocketAddrKind};

mod util;

use util::{init_with_api, pump_until};

const RING_SIZE: usize = 16;
const WRITE_BUDGET: usize = 64;

#[derive(Default)]
struct RingStats {
    writes: usize,
    receptions: usize,
    bytes_received: usize,
    send_errors: usize,
    recv_errors: usize,
}

fn ring_send(conn: &Connector, to: &SocketAddrKind, stats: &mut RingStats) {
    if stats.writes >= WRITE_BUDGET {
        return;
    }
    stats.writes += 1;
    match conn.send(b"e", to) {
        Ok(1) => {}
        Ok(_) | Err(_) => stats.send_errors += 1,
    }
}

#[test]
fn udp_echo_ring() {
    let api = init_with_api();
    let scheduler = Scheduler::new(&api, 0).expect("unable to create scheduler");

    // Bind the ring. Ports must be known up front so each connector can
    // address its successor; retry as a block on collisions.
    let mut ring: Vec<Connector> = Vec::with_capacity(RING_SIZE);
    let mut ports: Vec<u16> = Vec::with_capacity(RING_SIZE);
    'base: for _ in 0..16 {
        ring.clear();
        ports.clear();
        let base = util::ephemeral_port_base(RING_SIZE as u16);
        for i in 0..RING_SIZE {
            let port = base + i as u16;
            let conn =
                Connector::new(&api, &format!("udp4://127.0.0.1:{}", port)).unwrap();
            match conn.listen() {
                Ok(()) => {
                    ring.push(conn);
                    ports.push(port);
                }
                Err(Error::AddressInUse) => continue 'base,
                Err(err) => panic!("listen failed: {}", err),
            }
        }
        break;
    }
    assert_eq!(ring.len(), RING_SIZE, "could not bind the ring");

    let stats = Arc::new(Mutex::new(RingStats::default()));

    for (index, conn) in ring.iter().enumerate() {
        let successor = SocketAddrKind::Inet(
            format!("127.0.0.1:{}", ports[(index + 1) % RING_SIZE])
                .parse()
                .unwrap(),
        );
        let me = conn.clone();
        let stats = Arc::clone(&stats);
        let callback = Callback::new(move |ctx| {
            if !ctx.events.contains(Events::IO_READ) {
                return Ok(());
            }
            let mut buf = [0u8; 16];
            loop {
                match me.receive(&mut buf) {
                    Ok((n, _peer)) => {
                        let mut stats = stats.lock().unwrap();
                        stats.receptions += 1;
                        stats.bytes_received += n;
                        ring_send(&me, &successor, &mut stats);
                    }
                    Err(Error::Async) | Err(Error::RepeatAction) => break,
                    Err(_) => {
                        stats.lock().unwrap().recv_errors += 1;
                        break;
                    }
                }
            }
            Ok(())
        });
        scheduler
            .register_connector(Events::IO_READ, conn, &callback)
            .unwrap();
    }

    // Kick the ring off: every connector passes one byte to its successor.
    for (index, conn) in ring.iter().enumerate() {
        let successor = SocketAddrKind::Inet(
            format!("127.0.0.1:{}", ports[(index + 1) % RING_SIZE])
                .parse()
                .unwrap(),
        );
        ring_send(conn, &successor, &mut stats.lock().unwrap());
    }

    // Every write is eventually received.
    pump_until(&scheduler, Duration::from_secs(10), || {
        let stats = stats.lock().unwrap();
        stats.receptions + stats.send_errors + stats.recv_errors >= WRITE_BUDGET
    });

    let stats = stats.lock().unwrap();
    assert_eq!(stats.send_errors, 0);
    assert_eq!(stats.recv_errors, 0);
    assert_eq!(stats.writes, WRITE_BUDGET);
    assert_eq!(stats.receptions, WRITE_BUDGET);
    assert_eq!(stats.bytes_received, stats.receptions);
}
