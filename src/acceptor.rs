//! The dedicated accept thread.
//!
//! Runs independently of the reactor-driven data plane: one listener, one
//! thread, feeding a single shared reactor once a pair is dialed and
//! installed. Per-connection failures are contained to a `warn!`-and-
//! continue so one bad accept or dial never unwinds the loop.
//!
//! The acceptor's own blocking `accept()` is bounded by polling the raw
//! listener fd with a timeout first, so the thread revisits the shutdown
//! flag on a steady cadence instead of blocking in `accept()` forever.

use std::io::{self, Read};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream as MioTcpStream;
use tracing::{debug, info, warn};

use crate::reactor::Reactor;
use crate::socket;
use crate::table::ConnTable;

/// Header length per §6: 4-byte IPv4 + 2-byte big-endian port.
const HEADER_LEN: usize = 6;

/// Run the accept loop until `shutdown` is set or a non-transient accept
/// error occurs. Intended to be the body of the dedicated acceptor
/// thread.
pub fn run(
    listener: TcpListener,
    table: Arc<ConnTable>,
    reactor: Reactor,
    accept_poll: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let listener_fd = listener.as_raw_fd();

    while !shutdown.load(Ordering::Relaxed) {
        match wait_readable(listener_fd, accept_poll) {
            Ok(true) => {}
            Ok(false) => continue, // timed out; recheck shutdown
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "acceptor poll failed, terminating acceptor");
                return;
            }
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!(peer = %peer_addr, "accepted connection");
                handle_new_connection(stream, &table, &reactor);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                warn!(error = %e, "accept failed, terminating acceptor");
                return;
            }
        }
    }
    info!("acceptor observed shutdown, exiting");
}

/// Read the header, dial the target, and install the pair. Any failure
/// along the way closes the client handle and leaves no table or reactor
/// state; per-connection failures never affect other active pairs.
fn handle_new_connection(mut client: TcpStream, table: &Arc<ConnTable>, reactor: &Reactor) {
    let (ip, port) = match read_header(&mut client) {
        Ok(header) => header,
        Err(e) => {
            debug!(error = %e, "short or invalid header, dropping client");
            return; // `client` drops here, closing the socket.
        }
    };

    let server = match socket::dial(ip, port) {
        Ok(server) => server,
        Err(e) => {
            debug!(target = %ip, port, error = %e, "dial failed, dropping client");
            return;
        }
    };

    if let Err(e) = socket::set_nonblocking(&client) {
        warn!(error = %e, "failed to set client non-blocking, dropping pair");
        return;
    }
    if let Err(e) = socket::set_nonblocking(&server) {
        warn!(error = %e, "failed to set server non-blocking, dropping pair");
        return;
    }

    let client = MioTcpStream::from_std(client);
    let server = MioTcpStream::from_std(server);

    if let Err(e) = table.install(client, server, reactor) {
        warn!(error = %e, "failed to register pair with reactor, dropping pair");
    }
}

/// Read exactly `HEADER_LEN` bytes, looping over short reads so a header
/// split across TCP segments still assembles correctly. The stream is
/// still in its default blocking mode here.
fn read_header(stream: &mut TcpStream) -> io::Result<(Ipv4Addr, u16)> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = stream.read(&mut header[filled..])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before full header was received",
            ));
        }
        filled += n;
    }

    let ip = Ipv4Addr::new(header[0], header[1], header[2], header[3]);
    let port = u16::from_be_bytes([header[4], header[5]]);
    Ok((ip, port))
}

/// Block up to `timeout` for `fd` to become readable. Returns `Ok(true)`
/// if it did, `Ok(false)` on timeout, `Err` on a poll() failure.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    // SAFETY: `pollfd` is a single valid, live `libc::pollfd` on the
    // stack, and `nfds` matches the slice length passed to `poll(2)`.
    let rc = unsafe { libc::poll(&mut pollfd as *mut libc::pollfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc > 0 && pollfd.revents & libc::POLLIN != 0)
}
