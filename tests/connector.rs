use std::time::Duration;

use crossbar::{Connector, ConnectorType, Error, Events, Options, SocketAddrKind};

mod util;

use util::{bound_tcp, bound_udp, init, init_with_api, read_exact};

#[test]
fn connector_is_send_and_sync() {
    util::assert_send::<Connector>();
    util::assert_sync::<Connector>();
}

#[test]
fn anon_pipe_round_trip() {
    let api = init_with_api();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();
    assert!(conn.listening());
    assert!(conn.connected());
    assert!(conn.communicating());

    let payload = b"hello, world!";
    let written = conn.write(payload).unwrap();
    assert_eq!(written, payload.len());

    let echoed = read_exact(&conn, payload.len(), Duration::from_secs(1)).unwrap();
    assert_eq!(echoed, payload);
}

#[test]
fn anon_accept_shares_state() {
    let api = init_with_api();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    let accepted = conn.accept().unwrap();
    assert_eq!(accepted, conn);

    accepted.write(b"x").unwrap();
    let got = read_exact(&conn, 1, Duration::from_secs(1)).unwrap();
    assert_eq!(got, b"x");
}

#[test]
fn anon_peek_reports_available_bytes() {
    let api = init_with_api();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();
    assert_eq!(conn.peek().unwrap(), 0);

    conn.write(b"abc").unwrap();
    // Pipe writes land immediately on the read side.
    let mut available = 0;
    for _ in 0..100 {
        available = conn.peek().unwrap();
        if available > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(available, 3);
}

#[test]
fn default_connector_is_inert() {
    init();

    let conn = Connector::default();
    assert_eq!(conn.listen(), Err(Error::Initialization));
    assert_eq!(conn.connect(), Err(Error::Initialization));
    assert_eq!(conn.close(), Err(Error::Initialization));
    assert!(conn.accept().is_err());
    assert_eq!(conn.conn_type(), ConnectorType::Unspec);
    assert_eq!(conn, Connector::default());
}

#[test]
fn closed_connector_operations_fail() {
    let api = init_with_api();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();
    conn.close().unwrap();

    assert!(!conn.connected());
    assert_eq!(conn.write(b"x"), Err(Error::Initialization));
    assert_eq!(conn.read(&mut [0u8; 1]), Err(Error::Initialization));
}

#[test]
fn tcp_stream_round_trip() {
    let api = init_with_api();

    let (server, port) = bound_tcp(&api, "?blocking=1&behaviour=stream");
    assert!(server.listening());

    let client = Connector::new(
        &api,
        &format!("tcp4://127.0.0.1:{}?blocking=1", port),
    )
    .unwrap();
    client.connect().unwrap();
    assert!(client.connected());
    assert!(client.communicating());

    let peer = server.accept().unwrap();
    assert!(peer.connected());
    assert_ne!(peer, server);

    let request = b"Hello, world!";
    assert_eq!(client.write(request).unwrap(), request.len());
    let got = read_exact(&peer, request.len(), Duration::from_secs(2)).unwrap();
    assert_eq!(got, request);

    let response = b"Hello, world! [2]";
    assert_eq!(peer.write(response).unwrap(), response.len());
    let got = read_exact(&client, response.len(), Duration::from_secs(2)).unwrap();
    assert_eq!(got, response);
}

#[test]
fn tcp_connect_refused() {
    let api = init_with_api();

    // Nothing listens here.
    let port = util::ephemeral_port_base(1);
    let client = Connector::new(
        &api,
        &format!("tcp4://127.0.0.1:{}?blocking=1", port),
    )
    .unwrap();
    assert_eq!(client.connect(), Err(Error::ConnectionRefused));
}

#[test]
fn udp_send_receive_round_trip() {
    let api = init_with_api();

    let (a, port_a) = bound_udp(&api, "");
    let (b, port_b) = bound_udp(&api, "");
    assert!(a.communicating());

    let to_b = SocketAddrKind::Inet(format!("127.0.0.1:{}", port_b).parse().unwrap());
    let payload = b"datagram payload";
    assert_eq!(a.send(payload, &to_b).unwrap(), payload.len());

    let mut buf = [0u8; 64];
    let (n, sender) = loop {
        match b.receive(&mut buf) {
            Ok(result) => break result,
            Err(Error::Async) | Err(Error::RepeatAction) => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Err(err) => panic!("receive failed: {}", err),
        }
    };
    assert_eq!(&buf[..n], payload);

    // The sender address matches a's bound address.
    match sender {
        SocketAddrKind::Inet(addr) => {
            assert_eq!(addr.port(), port_a);
            assert!(addr.ip().is_loopback());
        }
        other => panic!("unexpected sender address: {:?}", other),
    }
}

#[cfg(unix)]
#[test]
fn local_stream_multi_client() {
    let api = init_with_api();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi");
    let url = format!("local://{}?blocking=1", path.display());

    let server = Connector::new(&api, &url).unwrap();
    server.listen().unwrap();
    assert!(server.listening());
    assert!(path.exists());

    let mut exchanges = Vec::new();
    for message in [&b"first client"[..], &b"second client"[..]] {
        let client = Connector::new(&api, &url).unwrap();
        match client.connect() {
            Ok(()) | Err(Error::Async) => {}
            Err(err) => panic!("connect failed: {}", err),
        }

        let peer = server.accept().unwrap();
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

    // The listening owner removes the filesystem entry on close.
    server.close().unwrap();
    assert!(!path.exists());
}

#[cfg(unix)]
#[test]
fn fifo_round_trip() {
    let api = init_with_api();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fifo");
    let url = format!("fifo://{}?blocking=1", path.display());

    let server = Connector::new(&api, &url).unwrap();
    server.listen().unwrap();
    assert!(server.listening());
    assert!(path.exists());

    let client = Connector::new(&api, &url).unwrap();
    client.connect().unwrap();
    assert!(client.connected());

    let payload = b"through the fifo";
    assert_eq!(client.write(payload).unwrap(), payload.len());
    let got = read_exact(&server, payload.len(), Duration::from_secs(2)).unwrap();
    assert_eq!(got, payload);

    server.close().unwrap();
    assert!(!path.exists());
}

#[cfg(unix)]
#[test]
fn filedesc_adopts_and_refuses_close() {
    let api = init_with_api();

    let conn = Connector::new(&api, "fd:///stdout?blocking=1").unwrap();
    assert!(conn.connected());
    assert!(conn.listening());
    assert!(conn.is_blocking());
    assert_eq!(conn.close(), Err(Error::UnsupportedAction));

    let upper = Connector::new(&api, "fd:///STDERR?blocking=1").unwrap();
    assert!(upper.get_read_handle().valid());

    assert!(Connector::new(&api, "fd:///nonsense").is_err());
}

#[test]
fn scheme_narrowing_and_peer_address() {
    let api = init_with_api();

    let conn = Connector::new(&api, "tcp://[::1]:4242").unwrap();
    assert_eq!(conn.conn_type(), ConnectorType::Tcp6);

    let peer = conn.peer_addr().unwrap();
    assert_eq!(peer.conn_type(), ConnectorType::Tcp6);
    assert_eq!(peer.scheme(), "tcp6");
    assert_eq!(peer.to_string(), "tcp6://[::1]:4242");

    // Peer address rendering is parseable again, modulo the narrowing.
    let again = Connector::new(&api, &peer.to_string()).unwrap();
    assert_eq!(again.conn_type(), ConnectorType::Tcp6);
    assert_eq!(again.peer_addr().unwrap().to_string(), peer.to_string());
}

#[test]
fn options_from_query_are_applied() {
    let api = init_with_api();

    let blocking = Connector::new(&api, "anon://?blocking=1").unwrap();
    assert!(blocking.is_blocking());
    assert!(blocking.get_options().contains(Options::BLOCKING));

    let nonblocking = Connector::new(&api, "anon://?blocking=no").unwrap();
    assert!(!nonblocking.is_blocking());

    let defaulted = Connector::new(&api, "anon://").unwrap();
    assert!(!defaulted.is_blocking());
    assert!(defaulted.get_options().contains(Options::STREAM));
}

#[test]
fn unknown_query_keys_are_ignored() {
    let api = init_with_api();
    let conn = Connector::new(&api, "anon://?frobnicate=9000").unwrap();
    assert!(conn.get_options().contains(Options::STREAM));
}

#[test]
fn unknown_scheme_is_rejected() {
    let api = init_with_api();
    assert_eq!(
        Connector::new(&api, "gopher://127.0.0.1:70").map(|_| ()),
        Err(Error::InvalidValue)
    );
}

#[test]
fn equal_connectors_hash_equally() {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let api = init_with_api();
    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();
    let clone = conn.clone();

    let hash = |c: &Connector| {
        let mut hasher = DefaultHasher::new();
        c.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(conn, clone);
    assert_eq!(hash(&conn), hash(&clone));
}

#[test]
fn registered_events_only_fire_for_registered_connector() {
    // Multiplexor invariant: only registered bits are reported.
    let api = init_with_api();

    let mut mux = crossbar::mux::create(crossbar::MuxType::Automatic).unwrap();
    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    mux.register_connector(&conn, Events::IO_READ).unwrap();

    // Nothing written yet: a short wait returns no events for it.
    let events = mux.wait(Duration::from_millis(10)).unwrap();
    assert!(events.iter().all(|e| e.connector != conn));

    conn.write(b"!").unwrap();
    let mut seen = Events::NONE;
    for _ in 0..100 {
        for event in mux.wait(Duration::from_millis(10)).unwrap() {
            if event.connector == conn {
                seen |= event.events;
            }
        }
        if !seen.is_empty() {
            break;
        }
    }
    assert!(seen.contains(Events::IO_READ));
    assert!(!seen.intersects(Events::IO_WRITE));

    mux.unregister_connector(&conn, Events::IO_READ).unwrap();
}
