//! Wires the components together: the reactor-driver (main) loop, the
//! acceptor thread, and the worker pool, all sharing one `ConnTable`.

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::acceptor;
use crate::config::{Config, ACCEPT_POLL_SECS, BIND_HOST, LISTEN_BACKLOG};
use crate::error::ProxyError;
use crate::reactor::{self, ReactorDriver};
use crate::socket;
use crate::table::ConnTable;
use crate::workers::WorkerPool;

pub struct Proxy {
    config: Config,
    table: Arc<ConnTable>,
    shutdown: Arc<AtomicBool>,
}

impl Proxy {
    pub fn new(config: Config) -> Self {
        Proxy {
            config,
            table: Arc::new(ConnTable::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the cooperative shutdown flag, for `main` to wire up a
    /// signal handler against.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// A clone of the connection table handle, so a caller can observe
    /// pair install/teardown from outside the running reactor loop.
    pub fn table(&self) -> Arc<ConnTable> {
        Arc::clone(&self.table)
    }

    /// Bind, start the acceptor and worker pool, and drive the reactor
    /// until the shutdown flag is observed. Returns once every component
    /// has wound down cleanly (§8 scenario 6).
    ///
    /// `on_ready` is called once the shutdown `Waker` exists, before the
    /// main loop starts polling, so the caller can hand it to a signal
    /// handler that needs to interrupt a possibly-indefinite poll.
    pub fn run(self, on_ready: impl FnOnce(Arc<mio::Waker>)) -> Result<(), ProxyError> {
        let listener = socket::bind_listen(BIND_HOST, self.config.port, LISTEN_BACKLOG)
            .map_err(ProxyError::Bind)?;
        info!(port = self.config.port, "listening");

        let (mut driver, reactor, waker) =
            ReactorDriver::new(self.config.max_events).map_err(ProxyError::ReactorInit)?;
        on_ready(Arc::clone(&waker));

        let pool = WorkerPool::new(self.config.threads, Arc::clone(&self.table), reactor.clone());

        // The acceptor needs its own blocking-mode listener handle,
        // independent of anything the reactor touches; the listener
        // itself is never registered with the reactor, only the accepted
        // client/server pairs are (§4.D). `try_clone` dup(2)s the fd.
        let acceptor_listener = duplicate_listener(&listener)?;

        let acceptor_table = Arc::clone(&self.table);
        let acceptor_reactor = reactor.clone();
        let acceptor_shutdown = Arc::clone(&self.shutdown);
        let accept_poll = socket::accept_poll_timeout(ACCEPT_POLL_SECS);
        let acceptor_thread = std::thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || {
                acceptor::run(
                    acceptor_listener,
                    acceptor_table,
                    acceptor_reactor,
                    accept_poll,
                    acceptor_shutdown,
                )
            })
            .expect("failed to spawn acceptor thread");

        let timeout = reactor::poll_timeout(self.config.timeout_secs);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let events = driver.poll(timeout).map_err(ProxyError::Poll)?;

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            for event in events {
                if !event.read_or_error {
                    continue;
                }
                // Unregister before dispatch: edge-triggered delivery
                // fires once per transition, so the main loop must not
                // re-deliver this handle to a second worker while one is
                // still draining it (§4.D).
                let Some(record) = self.table.lookup(event.fd) else {
                    continue; // already torn down concurrently
                };
                {
                    let mut stream = record.stream.lock().unwrap();
                    let _ = reactor.unregister(&mut *stream);
                }
                pool.submit(event.fd);
            }
        }

        info!("shutting down: waiting for acceptor and in-flight forwards");
        let _ = waker.wake(); // wakes us if we're not already past the poll
        let _ = acceptor_thread.join();
        pool.shutdown();
        Ok(())
    }
}

fn duplicate_listener(listener: &StdTcpListener) -> Result<StdTcpListener, ProxyError> {
    listener.try_clone().map_err(ProxyError::Bind)
}
