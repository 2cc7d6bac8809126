//! Drains a ready handle and writes what it read into its paired handle.
//!
//! A would-block on the paired write is retried until it completes or a
//! retry budget is exhausted, rather than being folded into the same
//! would-block handling as the read: a slow receiver must stall or fail
//! the pair, never silently truncate the forwarded stream.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::reactor::Reactor;
use crate::table::ConnTable;

/// Read up to this many bytes per non-blocking `recv`.
const BUFSIZE: usize = 4096;

/// How many consecutive `WouldBlock` writes to retry before giving up on
/// a stalled peer. At roughly a yield per attempt this bounds a single
/// forward at a few hundred milliseconds of worker time under sustained
/// backpressure. See the backpressure note in DESIGN.md.
const MAX_WRITE_RETRIES: u32 = 10_000;

/// Forward whatever is ready on `fd`. Looks up the pair, drains `fd`
/// until EOF, a fatal error, or EAGAIN, writing each chunk into the
/// peer. On EAGAIN the handle is re-armed with the reactor. On EOF or a
/// fatal read/write error the pair is torn down.
pub fn forward(fd: RawFd, table: &Arc<ConnTable>, reactor: &Reactor) -> io::Result<()> {
    let Some(record) = table.lookup(fd) else {
        // A concurrent teardown already fired for this handle.
        return Ok(());
    };

    let mut buf = [0u8; BUFSIZE];
    loop {
        let n = {
            let mut stream = record.stream.lock().unwrap();
            stream.read(&mut buf)
        };

        match n {
            Ok(0) => {
                debug!(fd, "peer closed, tearing down pair");
                table.remove(fd, reactor);
                return Ok(());
            }
            Ok(n) => {
                if let Err(e) = write_to_peer(table, record.peer, &buf[..n]) {
                    warn!(fd, peer = record.peer, error = %e, "fatal write error, tearing down pair");
                    table.remove(fd, reactor);
                    return Err(e);
                }
                // Keep draining: edge-triggered delivery fires once per
                // transition, so we must read until WouldBlock.
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                let mut stream = record.stream.lock().unwrap();
                reactor.register(&mut *stream, fd)?;
                return Ok(());
            }
            Err(e) => {
                warn!(fd, error = %e, "fatal read error, tearing down pair");
                table.remove(fd, reactor);
                return Err(e);
            }
        }
    }
}

/// Write `data` to the peer of the handle we just drained, in full. The
/// peer socket stays non-blocking for its whole lifetime (§4.C step 4),
/// so "blocking until all are written" is realized as a retry-on-
/// WouldBlock loop rather than a true blocking syscall. See DESIGN.md's
/// Open Question note.
fn write_to_peer(table: &ConnTable, peer_fd: RawFd, data: &[u8]) -> io::Result<()> {
    let Some(peer) = table.lookup(peer_fd) else {
        return Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "peer already torn down",
        ));
    };

    let mut written = 0;
    let mut retries = 0u32;
    while written < data.len() {
        let result = {
            let mut stream = peer.stream.lock().unwrap();
            stream.write(&data[written..])
        };
        match result {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => {
                written += n;
                retries = 0;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries >= MAX_WRITE_RETRIES {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer write stalled under backpressure",
                    ));
                }
                thread::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
