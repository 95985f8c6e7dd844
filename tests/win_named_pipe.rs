#![cfg(windows)]

//! Named pipe connectors: multi-client accept semantics and scheduler
//! driven accepts. Every `accept` hands off the connected instance and
//! stands up a fresh one under the same name, which is what makes the
//! sequential multi-client exchange below work.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbar::{Callback, Connector, Error, Events, Scheduler};
use rand::Rng;

mod util;

use util::{init_with_api, pump_until, read_exact};

/// A pipe URL unlikely to collide with other test runs.
fn pipe_url(suffix: &str) -> String {
    let num: u64 = rand::rng().random();
    format!("pipe:///crossbar-test-{:x}{}", num, suffix)
}

/// Connect a client, retrying while all server instances are busy.
fn connect_client(conn: &Connector, limit: Duration) {
    let deadline = Instant::now() + limit;
    loop {
        match conn.connect() {
            Ok(()) => return,
            Err(Error::RepeatAction) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Err(err) => panic!("connect failed: {}", err),
        }
    }
}

/// Write on a possibly non-blocking pipe, settling pending overlapped
/// writes through repeated calls.
fn write_all(conn: &Connector, buf: &[u8], limit: Duration) -> usize {
    let deadline = Instant::now() + limit;
    loop {
        match conn.write(buf) {
            Ok(n) => return n,
            Err(Error::Async) | Err(Error::RepeatAction) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Err(err) => panic!("write failed: {}", err),
        }
    }
}

#[test]
fn named_pipe_multi_client() {
    let api = init_with_api();

    let url = pipe_url("?blocking=1");
    let server = Connector::new(&api, &url).unwrap();
    server.listen().unwrap();
    assert!(server.listening());

    let mut exchanges = Vec::new();
    for message in [&b"first client"[..], &b"second client"[..]] {
        let client = Connector::new(&api, &url).unwrap();
        connect_client(&client, Duration::from_secs(2));
        assert!(client.connected());

        let peer = server.accept().unwrap();
        assert!(peer.connected());
        assert_ne!(peer, server);

        assert_eq!(client.write(message).unwrap(), message.len());
        let got = read_exact(&peer, message.len(), Duration::from_secs(2)).unwrap();
        assert_eq!(got, message);

        // And the reverse direction, with a distinct payload.
        let reply: Vec<u8> = message.iter().rev().copied().collect();
        assert_eq!(peer.write(&reply).unwrap(), reply.len());
        let got = read_exact(&client, reply.len(), Duration::from_secs(2)).unwrap();
        assert_eq!(got, reply);

        exchanges.push((message.to_vec(), reply));
    }
    assert_eq!(exchanges.len(), 2);

    server.close().unwrap();
    assert!(!server.listening());
}

#[test]
fn named_pipe_accept_through_scheduler() {
    let api = init_with_api();
    let scheduler = Scheduler::new(&api, 0).expect("unable to create scheduler");

    let url = pipe_url("");
    let server = Connector::new(&api, &url).unwrap();
    server.listen().unwrap();

    let accepted: Arc<Mutex<Vec<Connector>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&accepted);
    let listener = server.clone();
    let on_open = Callback::new(move |ctx| {
        assert!(ctx
            .events
            .intersects(Events::IO_OPEN | Events::IO_READ));
        match listener.accept() {
            Ok(peer) => sink.lock().unwrap().push(peer),
            Err(Error::Async) | Err(Error::RepeatAction) => {}
            Err(err) => return Err(err),
        }
        Ok(())
    });
    scheduler
        .register_connector(Events::IO_OPEN | Events::IO_READ, &server, &on_open)
        .unwrap();

    // Let the registration land before the client knocks.
    let _ = scheduler.process_events(Duration::from_millis(10), true, false);

    let client = Connector::new(&api, &format!("{}?blocking=1", url)).unwrap();
    connect_client(&client, Duration::from_secs(2));

    pump_until(&scheduler, Duration::from_secs(5), || {
        !accepted.lock().unwrap().is_empty()
    });

    let peer = accepted.lock().unwrap().pop().unwrap();
    assert!(peer.connected());

    let request = b"ping over the pipe";
    assert_eq!(client.write(request).unwrap(), request.len());
    let got = read_exact(&peer, request.len(), Duration::from_secs(2)).unwrap();
    assert_eq!(got, request);

    // The accepted end inherited the server's non-blocking mode.
    let reply = b"pong";
    assert_eq!(write_all(&peer, reply, Duration::from_secs(2)), reply.len());
    let got = read_exact(&client, reply.len(), Duration::from_secs(2)).unwrap();
    assert_eq!(got, reply);
}
