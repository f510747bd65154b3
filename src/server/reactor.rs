//! Reactor (worker event loop).
//!
//! Each reactor runs on its own thread and owns a private `mio::Poll`, the
//! connections handed to it, a [`BatchExecutor`], and the FIFO of batches
//! that executor has not finished yet.
//!
//! ## Loop
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ 1. register connections handed off by the acceptor       │
//! │ 2. poll (bounded wait)                                   │
//! │ 3. writable: flush output, drop write interest if empty  │
//! │ 4. readable: read + frame, submit one batch per read     │
//! │ 5. drain completed batches in order into output buffers  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Tokens are never reused, so a batch that completes after its connection
//! closed finds no connection and is discarded.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionError, ConnectionStats, ReadBatch};
use crate::protocol::Task;
use crate::server::executor::{BatchExecutor, PendingQueue};
use crossbeam_queue::SegQueue;
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Readiness events fetched per poll.
const EVENTS_CAPACITY: usize = 256;

type Incoming = SegQueue<(TcpStream, SocketAddr)>;

/// The acceptor's side of a reactor: a queue to hand new connections to.
#[derive(Clone)]
pub struct ReactorHandle {
    id: usize,
    incoming: Arc<Incoming>,
    running: Arc<AtomicBool>,
}

impl ReactorHandle {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            incoming: Arc::new(SegQueue::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The reactor's index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns false once the reactor's loop has exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queues an accepted connection for this reactor.
    ///
    /// A stopped reactor hands the connection back so it can go elsewhere.
    pub fn hand_off(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), (TcpStream, SocketAddr)> {
        if !self.is_running() {
            return Err((stream, addr));
        }
        self.incoming.push((stream, addr));

        // Lost the race with `mark_stopped`: nobody will register these
        if !self.is_running() {
            self.discard_queued();
        }
        Ok(())
    }

    /// Number of connections waiting to be registered.
    pub fn queued(&self) -> usize {
        self.incoming.len()
    }

    /// Stops accepting handoffs and closes anything still queued.
    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
        self.discard_queued();
    }

    fn discard_queued(&self) {
        while let Some((_, addr)) = self.incoming.pop() {
            debug!(client = %addr, reactor = self.id, "Dropping connection queued for stopped reactor");
        }
    }
}

/// One worker event loop.
pub struct Reactor {
    id: usize,
    poll: Poll,
    handle: ReactorHandle,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    executor: BatchExecutor,
    pending: PendingQueue,
    stats: Arc<ConnectionStats>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    buffer_capacity: usize,
}

impl Reactor {
    /// Creates a reactor and starts its executor thread.
    pub fn new(
        id: usize,
        handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        shutdown: Arc<AtomicBool>,
        config: &ServerConfig,
    ) -> io::Result<(Self, ReactorHandle)> {
        let handle = ReactorHandle::new(id);
        let reactor = Self {
            id,
            poll: Poll::new()?,
            handle: handle.clone(),
            connections: HashMap::new(),
            next_token: 0,
            executor: BatchExecutor::spawn(id, handler)?,
            pending: PendingQueue::new(),
            stats,
            shutdown,
            poll_interval: config.reactor_poll_interval,
            buffer_capacity: config.buffer_capacity,
        };
        Ok((reactor, handle))
    }

    /// The reactor's index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs the event loop until shutdown is signalled.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!(reactor = self.id, "Reactor started");

        while !self.shutdown.load(Ordering::Acquire) {
            self.register_incoming();

            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_interval)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(reactor = self.id, error = %e, "Poll failed");
                self.stop();
                return Err(e);
            }

            for event in events.iter() {
                self.dispatch(event);
            }

            self.drain_results();
        }

        self.stop();
        Ok(())
    }

    /// Registers every connection the acceptor has handed over.
    fn register_incoming(&mut self) {
        while let Some((stream, addr)) = self.handle.incoming.pop() {
            let token = Token(self.next_token);
            self.next_token += 1;

            let mut conn = Connection::new(token, addr, stream, self.buffer_capacity);
            let interest = conn.interest();
            if let Err(e) = self
                .poll
                .registry()
                .register(&mut conn.stream, token, interest)
            {
                warn!(client = %addr, reactor = self.id, error = %e, "Failed to register connection");
                continue;
            }

            self.stats.connection_opened();
            info!(client = %addr, reactor = self.id, "Client connection accepted");
            self.connections.insert(token, conn);
        }
    }

    fn dispatch(&mut self, event: &Event) {
        let token = event.token();

        if event.is_writable() {
            self.on_writable(token);
        }
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.on_readable(token);
        }
    }

    fn on_writable(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let outcome = match conn.flush(&self.stats) {
            Ok(true) if conn.set_wants_write(false) => {
                let interest = conn.interest();
                self.poll
                    .registry()
                    .reregister(&mut conn.stream, token, interest)
                    .map_err(ConnectionError::from)
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let addr = conn.addr;
            self.log_failure(addr, &e);
            self.close(token);
        }
    }

    fn on_readable(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let addr = conn.addr;

        match conn.read_tasks(&self.stats) {
            Ok(ReadBatch { tasks, eof }) => {
                if !tasks.is_empty() {
                    self.submit(token, tasks);
                }
                if eof {
                    info!(client = %addr, reactor = self.id, "Client disconnected");
                    self.close(token);
                }
            }
            Err(e) => {
                self.log_failure(addr, &e);
                self.close(token);
            }
        }
    }

    /// Hands one read's worth of tasks to the executor as a single batch.
    fn submit(&mut self, token: Token, tasks: Vec<Task>) {
        match self.executor.submit(token, tasks) {
            Ok(pending) => self.pending.push(pending),
            Err(e) => {
                error!(reactor = self.id, error = %e, "Failed to submit batch");
                self.close(token);
            }
        }
    }

    /// Moves completed batches, in submission order, into output buffers.
    fn drain_results(&mut self) {
        let mut failed = Vec::new();

        for result in self.pending.drain_ready() {
            let Some(conn) = self.connections.get_mut(&result.token) else {
                trace!(reactor = self.id, token = ?result.token, "Discarding result for closed connection");
                continue;
            };

            self.stats.commands_processed(result.outcomes.len());

            let queued = conn.queue_outcomes(&result.outcomes).and_then(|()| {
                if conn.set_wants_write(true) {
                    let interest = conn.interest();
                    self.poll
                        .registry()
                        .reregister(&mut conn.stream, result.token, interest)?;
                }
                Ok(())
            });

            if let Err(e) = queued {
                failed.push((result.token, conn.addr, e));
            }
        }

        for (token, addr, e) in failed {
            self.log_failure(addr, &e);
            self.close(token);
        }
    }

    /// Cancels a connection's registration and drops its buffers.
    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
                debug!(client = %conn.addr, error = %e, "Deregister failed");
            }
            self.stats.connection_closed();
        }
    }

    fn log_failure(&self, addr: SocketAddr, err: &ConnectionError) {
        match err {
            ConnectionError::IoError(io_err)
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                ) =>
            {
                debug!(client = %addr, reactor = self.id, "Connection reset by client")
            }
            ConnectionError::FrameError(_) => {
                warn!(client = %addr, reactor = self.id, error = %err, "Rejecting request, closing connection")
            }
            _ => warn!(client = %addr, reactor = self.id, error = %err, "Connection error"),
        }
    }

    fn stop(&mut self) {
        self.handle.mark_stopped();

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close(token);
        }
        self.executor.shutdown();
        info!(
            reactor = self.id,
            abandoned = self.pending.len(),
            "Reactor stopped"
        );
    }
}
