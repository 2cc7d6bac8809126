//! Socket primitives: bind/listen, dial, and the non-blocking switch.
//!
//! Everything here is a thin wrapper over `socket2`/`std::net`. Failures
//! from the OS propagate unchanged to the caller.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// Bind and listen on `host:port` with `SO_REUSEADDR` and close-on-exec set.
pub fn bind_listen(host: Ipv4Addr, port: u16, backlog: i32) -> io::Result<TcpListener> {
    let addr = SocketAddr::V4(SocketAddrV4::new(host, port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_cloexec(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Dial the target named by the destination header. Blocks on connect.
pub fn dial(ip: Ipv4Addr, port: u16) -> io::Result<TcpStream> {
    let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
    TcpStream::connect(addr)
}

/// Switch a stream to non-blocking mode.
pub fn set_nonblocking(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)
}

/// Set a read timeout on the listening socket so the acceptor's blocking
/// `accept()` call periodically returns to let it observe the shutdown
/// flag. `std::net::TcpListener` has no read-timeout of its own; we poll
/// the raw fd with a timeout before each `accept()` instead (see
/// `acceptor::wait_readable`), so this helper only needs to convert the
/// configured seconds into the `Duration` the poll call wants.
pub fn accept_poll_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
