//! Process-fatal error types.
//!
//! A small manual error enum per fallible startup subsystem, rather than
//! a blanket `anyhow::Error`. Per-connection errors are plain
//! `std::io::Error` values logged and dropped at the call site; they
//! never become a `ProxyError`, since only bind/listen/reactor failures
//! are process-fatal.

use std::fmt;
use std::io;

/// Errors that abort startup. Per §7, only these cause a non-zero exit.
#[derive(Debug)]
pub enum ProxyError {
    /// Binding or listening on the configured port failed.
    Bind(io::Error),
    /// Creating the reactor (`mio::Poll::new`) failed.
    ReactorInit(io::Error),
    /// A `Poll::poll` call in the main loop returned a fatal error.
    Poll(io::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Bind(e) => write!(f, "failed to bind/listen: {e}"),
            ProxyError::ReactorInit(e) => write!(f, "failed to initialize reactor: {e}"),
            ProxyError::Poll(e) => write!(f, "reactor poll failed: {e}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Bind(e) | ProxyError::ReactorInit(e) | ProxyError::Poll(e) => Some(e),
        }
    }
}
