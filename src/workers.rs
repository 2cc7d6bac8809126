//! Bounded pool of forwarder workers.
//!
//! A fixed set of long-lived threads pulls tasks off a shared channel,
//! FIFO, one task run to completion per worker before it takes another.
//! The reactor and the worker pool are kept as separate components: one
//! shared reactor feeds N workers pulling dispatched handles, rather
//! than each worker owning its own reactor and listener.
//!
//! The channel is unbounded: a bounded channel's `send` could block the
//! single reactor-driver thread inside `submit`, stalling readiness
//! delivery for every other pair. Saturation under load means the queue
//! grows, not that the driver stalls or an event is dropped.

use std::os::unix::io::RawFd;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::forwarder;
use crate::reactor::Reactor;
use crate::table::ConnTable;

/// Unit of work submitted to the pool: forward whatever is ready on `fd`.
pub enum Task {
    Forward(RawFd),
    Shutdown,
}

pub struct WorkerPool {
    sender: Sender<Task>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads (size is clamped to at least 1).
    pub fn new(size: usize, table: Arc<ConnTable>, reactor: Reactor) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(std::sync::Mutex::new(receiver));

        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let receiver: Arc<std::sync::Mutex<Receiver<Task>>> = Arc::clone(&receiver);
            let table = Arc::clone(&table);
            let reactor = reactor.clone();

            let handle = thread::Builder::new()
                .name(format!("forwarder-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &receiver, &table, &reactor))
                .expect("failed to spawn forwarder worker thread");
            handles.push(handle);
        }

        WorkerPool { sender, handles }
    }

    /// Hand a ready fd to the pool. Never blocks the caller (the
    /// reactor-driver thread) and never drops the task.
    pub fn submit(&self, fd: RawFd) {
        // The only failure mode is every worker having already exited,
        // which only happens during shutdown teardown.
        let _ = self.sender.send(Task::Forward(fd));
    }

    /// Ask every worker to exit after draining in-flight work, then join
    /// them. Workers finish whatever forward they're mid-way through;
    /// there is no forced cancellation.
    pub fn shutdown(self) {
        for _ in &self.handles {
            let _ = self.sender.send(Task::Shutdown);
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: &std::sync::Mutex<Receiver<Task>>,
    table: &Arc<ConnTable>,
    reactor: &Reactor,
) {
    loop {
        let task = {
            let rx = receiver.lock().unwrap();
            rx.recv()
        };
        match task {
            Ok(Task::Forward(fd)) => {
                if let Err(e) = forwarder::forward(fd, table, reactor) {
                    debug!(worker = worker_id, fd, error = %e, "forward failed");
                }
            }
            Ok(Task::Shutdown) => break,
            Err(_) => {
                error!(worker = worker_id, "worker channel closed unexpectedly");
                break;
            }
        }
    }
}
