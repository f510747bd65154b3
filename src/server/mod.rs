//! Server Module
//!
//! The acceptor owns the listening socket and a `mio::Poll` used only for
//! accept readiness. Accepted sockets are handed round-robin to N reactors,
//! each running on its own thread.
//!
//! ```text
//!                      ┌──────────────┐
//!   connect ─────────> │   Acceptor   │  accept until WouldBlock
//!                      └──────┬───────┘
//!              round-robin    │  SegQueue handoff
//!        ┌────────────────────┼────────────────────┐
//!        ▼                    ▼                    ▼
//!   ┌──────────┐        ┌──────────┐        ┌──────────┐
//!   │Reactor 0 │        │Reactor 1 │   ...  │Reactor N │
//!   │ executor │        │ executor │        │ executor │
//!   └────┬─────┘        └────┬─────┘        └────┬─────┘
//!        └───────────────────┼───────────────────┘
//!                            ▼
//!                      OrderedStore
//! ```

pub mod executor;
pub mod reactor;

pub use executor::{BatchExecutor, BatchResult, ExecutorError, PendingQueue, PendingResult};
pub use reactor::{Reactor, ReactorHandle};

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::ConnectionStats;
use crate::storage::OrderedStore;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

/// Poll bound while accepts are deferred for lack of resources
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors that prevent the server from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot resolve bind address {0}")]
    AddressResolution(String),

    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("reactor {0} panicked")]
    ReactorPanicked(usize),

    #[error("every reactor has stopped")]
    ReactorsStopped,
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Stops a running server from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Signals every loop to stop and wakes the acceptor.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "Failed to wake acceptor");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// What the acceptor does after a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptRetry {
    /// The listen queue is empty
    Drained,
    /// Only this connection failed; keep accepting
    Next,
    /// Out of descriptors or buffers; retry after a short delay
    Later,
}

fn classify_accept_error(err: &io::Error) -> AcceptRetry {
    match err.kind() {
        io::ErrorKind::WouldBlock => AcceptRetry::Drained,
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::PermissionDenied => AcceptRetry::Next,
        _ => AcceptRetry::Later,
    }
}

/// Distributes accepted connections across reactors in rotation.
struct Acceptor {
    listener: TcpListener,
    handles: Vec<ReactorHandle>,
    next: usize,
    /// Connections may still be waiting in the listen queue
    backlog_pending: bool,
}

impl Acceptor {
    fn new(listener: TcpListener, handles: Vec<ReactorHandle>) -> Self {
        Self {
            listener,
            handles,
            next: 0,
            backlog_pending: false,
        }
    }

    /// Next running reactor in rotation, skipping stopped ones.
    fn next_reactor(&mut self) -> Option<&ReactorHandle> {
        for _ in 0..self.handles.len() {
            let index = self.next % self.handles.len();
            self.next = self.next.wrapping_add(1);
            if self.handles[index].is_running() {
                return Some(&self.handles[index]);
            }
        }
        None
    }

    fn has_running_reactor(&self) -> bool {
        self.handles.iter().any(ReactorHandle::is_running)
    }

    /// Accepts until the listener would block.
    ///
    /// Readiness is edge-triggered, so stopping early on a resource error
    /// sets `backlog_pending` and the run loop calls back without a new event.
    fn accept_ready(&mut self) {
        self.backlog_pending = false;

        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    self.dispatch(stream, addr);
                }
                Err(e) => match classify_accept_error(&e) {
                    AcceptRetry::Drained => break,
                    AcceptRetry::Next => {
                        debug!(error = %e, "Accept failed for one connection");
                    }
                    AcceptRetry::Later => {
                        warn!(error = %e, "Failed to accept connection, retrying shortly");
                        self.backlog_pending = true;
                        break;
                    }
                },
            }
        }
    }

    fn dispatch(&mut self, stream: TcpStream, addr: SocketAddr) {
        let mut conn = (stream, addr);
        while let Some(handle) = self.next_reactor() {
            let id = handle.id();
            match handle.hand_off(conn.0, conn.1) {
                Ok(()) => {
                    debug!(client = %addr, reactor = id, "Sent connection to reactor");
                    return;
                }
                Err(returned) => conn = returned,
            }
        }
        error!(client = %addr, "No running reactor, dropping connection");
    }
}

/// A bound server, ready to run.
pub struct Server {
    config: ServerConfig,
    poll: Poll,
    acceptor: Acceptor,
    reactors: Vec<Reactor>,
    local_addr: SocketAddr,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    store: Arc<OrderedStore>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Binds a server backed by a fresh store.
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        Self::bind_with_store(config, Arc::new(OrderedStore::new()))
    }

    /// Binds the listening socket and builds every reactor.
    ///
    /// Reactor threads are not started until [`Server::run`].
    pub fn bind_with_store(config: ServerConfig, store: Arc<OrderedStore>) -> ServerResult<Self> {
        config.validate().map_err(ServerError::InvalidConfig)?;
        let addr = config.resolve().map_err(ServerError::AddressResolution)?;

        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ConnectionStats::new());

        let mut reactors = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let (reactor, handle) = Reactor::new(
                id,
                CommandHandler::new(Arc::clone(&store)),
                Arc::clone(&stats),
                Arc::clone(&shutdown),
                &config,
            )?;
            reactors.push(reactor);
            handles.push(handle);
        }

        info!(addr = %local_addr, workers = config.workers, "Server bound");

        Ok(Self {
            config,
            poll,
            acceptor: Acceptor::new(listener, handles),
            reactors,
            local_addr,
            waker,
            shutdown,
            store,
            stats,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &Arc<OrderedStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Starts the reactors and runs the accept loop on the calling thread.
    ///
    /// Returns once a [`ShutdownHandle`] fires and every reactor has stopped.
    pub fn run(self) -> ServerResult<()> {
        let Server {
            config,
            mut poll,
            mut acceptor,
            reactors,
            local_addr,
            shutdown,
            store,
            stats,
            ..
        } = self;

        let mut threads = Vec::with_capacity(reactors.len());
        for reactor in reactors {
            let id = reactor.id();
            let thread = thread::Builder::new()
                .name(format!("tidekv-reactor-{}", id))
                .spawn(move || reactor.run());
            match thread {
                Ok(thread) => threads.push((id, thread)),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    join_reactors(threads);
                    return Err(e.into());
                }
            }
        }

        info!(addr = %local_addr, workers = threads.len(), "Server started");

        let mut events = Events::with_capacity(128);
        let result = loop {
            if shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            if !acceptor.has_running_reactor() {
                error!("Every reactor has stopped");
                break Err(ServerError::ReactorsStopped);
            }

            let timeout = if acceptor.backlog_pending {
                ACCEPT_RETRY_DELAY
            } else {
                config.accept_idle_timeout
            };
            if let Err(e) = poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Acceptor poll failed");
                break Err(ServerError::Io(e));
            }

            let listener_ready = events.iter().any(|event| event.token() == LISTENER);
            if listener_ready || acceptor.backlog_pending {
                acceptor.accept_ready();
            } else if events.is_empty() {
                info!(
                    idle_secs = config.accept_idle_timeout.as_secs(),
                    keys = store.len(),
                    active_connections = stats.active(),
                    "No connection attempts"
                );
            }
        };

        info!("Shutting down reactors");
        shutdown.store(true, Ordering::Release);
        let joined = join_reactors(threads);

        let store_stats = store.stats();
        info!(
            keys = store_stats.keys,
            gets = store_stats.gets,
            puts = store_stats.puts,
            deletes = store_stats.deletes,
            "Server shutdown complete"
        );

        result.and(joined)
    }
}

fn join_reactors(threads: Vec<(usize, thread::JoinHandle<io::Result<()>>)>) -> ServerResult<()> {
    let mut outcome = Ok(());
    for (id, thread) in threads {
        match thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(reactor = id, error = %e, "Reactor failed"),
            Err(_) => {
                error!(reactor = id, "Reactor panicked");
                outcome = Err(ServerError::ReactorPanicked(id));
            }
        }
    }
    outcome
}
