//! End-to-end scenarios against in-process loopback fixtures (§8): the
//! proxy binds its own port, a fixture echo server stands in for the
//! dial target, and a plain TCP client drives the header + payload
//! protocol from the outside, exactly as the out-of-scope test client
//! the core spec assumes would.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use massproxy::config::CliArgs;
use massproxy::table::ConnTable;
use massproxy::{Config, Proxy};

/// Spawn a loopback echo server and return its bound port.
fn spawn_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

/// Start a proxy on an ephemeral port, in-process, returning its port, a
/// handle onto its connection table the test can inspect, and a shutdown
/// switch the test can flip at the end.
fn spawn_proxy(threads: usize) -> (u16, Arc<ConnTable>, impl FnOnce()) {
    // Port 0 would be ideal but the proxy itself must pick a concrete
    // port before its thread starts so the test can connect; bind a
    // throwaway listener first purely to reserve a free port number,
    // then hand that number to the proxy after releasing it back.
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = Config::from_args(CliArgs {
        port,
        threads,
        timeout: -1,
        maxevents: 64,
        verbose: 0,
    });

    let proxy = Proxy::new(config);
    let shutdown = proxy.shutdown_flag();
    let table = proxy.table();
    let (waker_tx, waker_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        proxy
            .run(move |waker| {
                let _ = waker_tx.send(waker);
            })
            .unwrap();
    });

    let waker = waker_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    // Give the proxy's bind() a moment to land before the test dials in.
    thread::sleep(Duration::from_millis(100));

    let stopper = move || {
        shutdown.store(true, Ordering::SeqCst);
        let _ = waker.wake();
        let _ = handle.join();
    };
    (port, table, stopper)
}

fn header(ip: Ipv4Addr, port: u16) -> [u8; 6] {
    let octets = ip.octets();
    let port_be = port.to_be_bytes();
    [
        octets[0], octets[1], octets[2], octets[3], port_be[0], port_be[1],
    ]
}

#[test]
fn happy_path_echoes_payload_through_proxy() {
    let echo_port = spawn_echo();
    let (proxy_port, _table, stop) = spawn_proxy(4);

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    client
        .write_all(&header(Ipv4Addr::LOCALHOST, echo_port))
        .unwrap();
    client.write_all(b"hello\n").unwrap();

    let mut out = [0u8; 6];
    client.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"hello\n");

    drop(client);
    stop();
}

#[test]
fn peer_close_tears_down_cleanly_and_proxy_keeps_serving() {
    let echo_port = spawn_echo();
    let (proxy_port, _table, stop) = spawn_proxy(4);

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .write_all(&header(Ipv4Addr::LOCALHOST, echo_port))
        .unwrap();
    client.write_all(b"ping").unwrap();
    let mut out = [0u8; 4];
    client.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"ping");

    // Client closes its side; proxy should see EOF on the client handle,
    // tear the pair down, and keep accepting new connections.
    drop(client);
    thread::sleep(Duration::from_millis(100));

    let mut second = TcpStream::connect(("127.0.0.1", proxy_port)).unwrap();
    second.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    second
        .write_all(&header(Ipv4Addr::LOCALHOST, echo_port))
        .unwrap();
    second.write_all(b"again").unwrap();
    let mut out = [0u8; 5];
    second.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"again");

    drop(second);
    stop();
}

#[test]
fn concurrent_pairs_each_see_their_own_bytes_back() {
    const PAIRS: usize = 16;
    const PAYLOAD_LEN: usize = 8192;

    let echo_port = spawn_echo();
    let (proxy_port, _table, stop) = spawn_proxy(4);

    let mut handles = Vec::with_capacity(PAIRS);
    for i in 0..PAIRS {
        handles.push(thread::spawn(move || {
            // Deterministic per-pair payload so we can tell streams apart
            // without a random source.
            let payload: Vec<u8> = (0..PAYLOAD_LEN).map(|b| (b ^ i) as u8).collect();

            let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            client
                .write_all(&header(Ipv4Addr::LOCALHOST, echo_port))
                .unwrap();
            client.write_all(&payload).unwrap();

            let mut out = vec![0u8; PAYLOAD_LEN];
            client.read_exact(&mut out).unwrap();
            assert_eq!(out, payload, "pair {i} saw corrupted or cross-wired bytes");
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    stop();
}

#[test]
fn short_header_closes_client_without_dialing() {
    let (proxy_port, _table, stop) = spawn_proxy(2);

    // Per §8 scenario 5: the client sends only 3 of the 6 header bytes
    // then closes. Half-closing the write side (rather than dropping the
    // whole socket) lets the acceptor's blocking header read observe EOF
    // immediately, while this end stays open to observe the proxy's
    // answering close — without this explicit close the acceptor would
    // block forever inside the blocking header read waiting for bytes
    // that never arrive, wedging the dedicated acceptor thread.
    let mut buf = [0u8; 1];
    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    client.write_all(&[0x01, 0x02, 0x03]).unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    let result = client.read(&mut buf);
    match result {
        Ok(0) => {} // proxy dropped the handle on short header, as expected
        Ok(_) => panic!("proxy should never have dialed or echoed anything back"),
        Err(e) => panic!("unexpected error waiting for proxy to close: {e}"),
    }

    stop();
}

#[test]
fn dial_failure_leaves_no_table_entry() {
    let (proxy_port, table, stop) = spawn_proxy(2);

    // Per §8 scenario 2: reserve a port, then release it immediately so
    // nothing is listening there. Connecting to a closed local port
    // refuses the connection right away (ECONNREFUSED) instead of timing
    // out, giving a deterministic dial-failure target.
    let closed = TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_port = closed.local_addr().unwrap().port();
    drop(closed);

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    client
        .write_all(&header(Ipv4Addr::LOCALHOST, closed_port))
        .unwrap();
    client.write_all(b"x").unwrap();

    // The proxy's dial fails; the client handle is closed and nothing is
    // ever echoed back.
    let mut buf = [0u8; 1];
    match client.read(&mut buf) {
        Ok(0) => {} // proxy closed the client handle on dial failure, as expected
        Ok(_) => panic!("proxy should never have echoed anything back after a failed dial"),
        Err(e) => panic!("unexpected error waiting for proxy to close: {e}"),
    }

    // The client-side close only guarantees the acceptor reached the
    // dial-failure branch, not that it has fully returned from
    // installing (nothing, in this case) into the table; give it a
    // moment before asserting table state.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        table.len(),
        0,
        "a failed dial must never leave a table entry for either handle"
    );

    stop();
}
