//! Edge-triggered readiness multiplexer.
//!
//! A thin wrapper over `mio`: on Linux this is epoll, on macOS/BSD kqueue,
//! both always edge-triggered by construction, which gives a
//! READ | ERROR | edge-triggered watch mode without any extra flags to
//! set.
//!
//! `Reactor::register`/`unregister` are called from the acceptor thread,
//! the reactor-driver thread, and worker threads (on re-arm or teardown).
//! `mio::Registry::register`/`deregister` take `&self`; the kernel
//! serializes `epoll_ctl`/`kevent` internally, so these calls are safe
//! to invoke concurrently for distinct handles without an extra mutex.
//! Only `Poll::poll` (`&mut self`) is confined to the single
//! reactor-driver thread; that's `ReactorDriver`, kept deliberately
//! separate from the freely-clonable `Reactor` handle.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};

/// Reserved token for the shutdown waker. No real fd is ever
/// `as usize`-cast to `usize::MAX`.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// The event bits this spec recognizes on a ready handle.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: RawFd,
    /// READ | ERROR: data-readable, peer half-close, hang-up, or error.
    pub read_or_error: bool,
}

/// Shared, cloneable handle for register/unregister. Does not itself own
/// the poll loop.
#[derive(Clone)]
pub struct Reactor {
    registry: Registry,
}

impl Reactor {
    /// Register `source` for READ | ERROR | edge-triggered, keyed by `fd`.
    pub fn register<S: Source + ?Sized>(&self, source: &mut S, fd: RawFd) -> io::Result<()> {
        self.registry
            .register(source, Token(fd as usize), Interest::READABLE)
    }

    /// Unregister `source`. Idempotent from the caller's point of view:
    /// an error here (e.g. already deregistered) is not fatal to
    /// teardown, since the fd is being closed regardless.
    pub fn unregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.registry.deregister(source)
    }
}

/// Owns the actual `mio::Poll` and event buffer. Exactly one of these
/// exists per running proxy and it is driven from a single thread (the
/// reactor-driver / main loop).
pub struct ReactorDriver {
    poll: Poll,
    events: Events,
}

impl ReactorDriver {
    /// Create the reactor. Returns the driver (poll loop owner), a
    /// `Reactor` handle cloned to the acceptor and worker pool, and a
    /// `Waker` the shutdown signal handler uses to interrupt an
    /// indefinite (`--timeout -1`) poll immediately rather than waiting
    /// for the next real readiness event or a signal-dependent `EINTR`.
    pub fn new(max_events: usize) -> io::Result<(ReactorDriver, Reactor, Arc<Waker>)> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let driver = ReactorDriver {
            poll,
            events: Events::with_capacity(max_events),
        };
        Ok((driver, Reactor { registry }, waker))
    }

    /// Block (up to `timeout`, or indefinitely if `None`) for readiness
    /// events, then hand back every ready fd whose mask intersects
    /// READ | ERROR. A wake from the shutdown `Waker` produces no
    /// `ReadyEvent`. The caller is expected to recheck its shutdown flag
    /// after every `poll()` return, woken or not.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut ready = Vec::with_capacity(self.events.iter().count());
        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let read_or_error = event.is_readable()
                || event.is_read_closed()
                || event.is_write_closed()
                || event.is_error();
            if read_or_error {
                ready.push(ReadyEvent {
                    fd: event.token().0 as RawFd,
                    read_or_error,
                });
            }
        }
        Ok(ready)
    }
}

/// Translate the CLI's `--timeout` (seconds, -1 = indefinite) into the
/// `Option<Duration>` `ReactorDriver::poll` expects.
pub fn poll_timeout(timeout_secs: i64) -> Option<Duration> {
    if timeout_secs < 0 {
        None
    } else {
        Some(Duration::from_secs(timeout_secs as u64))
    }
}
