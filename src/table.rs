//! The paired connection table.
//!
//! A single logical connection is a pair of handles, referenced twice in
//! this table: once under the client's fd, once under the server's fd,
//! so that any reactor event, which only delivers one ready fd, resolves
//! its pair in one lookup.
//!
//! Insertion and removal of both keys of a pair happen under one lock
//! acquisition so no observer ever sees a half-installed or
//! half-torn-down pair. Per-connection I/O never happens while holding
//! that lock: each record wraps its own `Mutex<TcpStream>`, so two
//! workers draining distinct pairs never contend with each other.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;

use crate::reactor::Reactor;

/// Which side of the pair a table entry represents.
///
/// Unused by the forwarding path today (the forwarder is symmetric); kept
/// so a future asymmetric policy (e.g. logging only client->server bytes)
/// has the information on hand without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// One half of a pair: the socket, who its peer is, and which side it is.
pub struct ConnRecord {
    pub stream: Mutex<TcpStream>,
    pub peer: RawFd,
    pub role: Role,
}

/// Double-keyed mapping of fd -> paired-connection record.
pub struct ConnTable {
    inner: Mutex<HashMap<RawFd, Arc<ConnRecord>>>,
}

impl ConnTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Install both halves of a pair and register both with the reactor,
    /// all under one critical section.
    ///
    /// On a registration failure for either handle the table is left
    /// untouched (nothing is installed) and the error is returned to the
    /// caller, which is responsible for closing both streams.
    pub fn install(
        &self,
        client: TcpStream,
        server: TcpStream,
        reactor: &Reactor,
    ) -> io::Result<()> {
        let client_fd = client.as_raw_fd();
        let server_fd = server.as_raw_fd();

        let client_rec = Arc::new(ConnRecord {
            stream: Mutex::new(client),
            peer: server_fd,
            role: Role::Client,
        });
        let server_rec = Arc::new(ConnRecord {
            stream: Mutex::new(server),
            peer: client_fd,
            role: Role::Server,
        });

        let mut guard = self.inner.lock().unwrap();

        {
            let mut s = client_rec.stream.lock().unwrap();
            reactor.register(&mut *s, client_fd)?;
        }
        {
            let mut s = server_rec.stream.lock().unwrap();
            if let Err(e) = reactor.register(&mut *s, server_fd) {
                // Roll back the client registration so we never leave a
                // half-registered pair.
                let mut cs = client_rec.stream.lock().unwrap();
                let _ = reactor.unregister(&mut *cs);
                return Err(e);
            }
        }

        guard.insert(client_fd, client_rec);
        guard.insert(server_fd, server_rec);
        Ok(())
    }

    /// Look up the record for `fd`, or `None` if it's not installed (a
    /// concurrent teardown may already have fired).
    pub fn lookup(&self, fd: RawFd) -> Option<Arc<ConnRecord>> {
        self.inner.lock().unwrap().get(&fd).cloned()
    }

    /// Tear a pair down: find the peer via `fd`'s record, remove both
    /// keys, unregister both from the reactor, and let both streams drop
    /// (closing the sockets). Idempotent: removing an absent key is a
    /// no-op.
    pub fn remove(&self, fd: RawFd, reactor: &Reactor) {
        let mut guard = self.inner.lock().unwrap();
        let Some(this_rec) = guard.remove(&fd) else {
            return;
        };
        let peer_rec = guard.remove(&this_rec.peer);
        drop(guard);

        {
            let mut s = this_rec.stream.lock().unwrap();
            let _ = reactor.unregister(&mut *s);
        }
        if let Some(peer_rec) = peer_rec {
            let mut s = peer_rec.stream.lock().unwrap();
            let _ = reactor.unregister(&mut *s);
        }
        // Both `Arc<ConnRecord>`s drop here (unless a worker still holds a
        // clone mid-forward, in which case the stream closes once that
        // worker finishes with it); either way the fd is never reused by
        // this table.
    }

    /// Number of installed keys (twice the number of live pairs). Exposed
    /// for introspection in tests that need to observe that a failed
    /// dial left no table entry behind.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[cfg(test)]
    pub fn contains(&self, fd: RawFd) -> bool {
        self.inner.lock().unwrap().contains_key(&fd)
    }
}

impl Default for ConnTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::ReactorDriver;
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(client), TcpStream::from_std(server))
    }

    #[test]
    fn install_cross_references_both_keys() {
        let (_driver, reactor, _waker) = ReactorDriver::new(16).unwrap();
        let table = ConnTable::new();
        let (client, server) = loopback_pair();
        let client_fd = client.as_raw_fd();
        let server_fd = server.as_raw_fd();

        table.install(client, server, &reactor).unwrap();

        assert_eq!(table.len(), 2);
        let c = table.lookup(client_fd).unwrap();
        let s = table.lookup(server_fd).unwrap();
        assert_eq!(c.peer, server_fd);
        assert_eq!(s.peer, client_fd);
        assert_eq!(c.role, Role::Client);
        assert_eq!(s.role, Role::Server);
    }

    #[test]
    fn remove_drops_both_keys_at_once() {
        let (_driver, reactor, _waker) = ReactorDriver::new(16).unwrap();
        let table = ConnTable::new();
        let (client, server) = loopback_pair();
        let client_fd = client.as_raw_fd();
        let server_fd = server.as_raw_fd();

        table.install(client, server, &reactor).unwrap();
        table.remove(client_fd, &reactor);

        assert!(!table.contains(client_fd));
        assert!(!table.contains(server_fd));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_driver, reactor, _waker) = ReactorDriver::new(16).unwrap();
        let table = ConnTable::new();
        // Removing an fd that was never installed must be a no-op, not a panic.
        table.remove(999_999, &reactor);
        table.remove(999_999, &reactor);
        assert_eq!(table.len(), 0);
    }
}
