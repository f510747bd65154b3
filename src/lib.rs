//! # tidekv - A Multi-Reactor In-Memory Key-Value Server
//!
//! tidekv serves GET, PUT and DELETE over a compact length-prefixed binary
//! protocol. Connections are spread across a fixed pool of reactor threads,
//! each with its own event loop and single-threaded executor, all sharing one
//! ordered concurrent store.
//!
//! ## Features
//!
//! - **Binary protocol**: 4-byte request header, 2-byte response header
//! - **Multi-reactor**: one `mio` event loop per worker thread
//! - **Pipelining**: every request read in one go becomes one batch, and
//!   responses are written in exactly the order requests arrived
//! - **Ordered store**: lock-free skip list keyed by raw bytes
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              tidekv                                │
//! │                                                                    │
//! │  ┌─────────────┐  round-robin   ┌──────────────────────────────┐   │
//! │  │  Acceptor   │ ─────────────> │ Reactor 0..N                 │   │
//! │  │ (listener)  │   SegQueue     │  mio::Poll + Connections     │   │
//! │  └─────────────┘                │  BatchExecutor (1 thread)    │   │
//! │                                 │  PendingQueue (FIFO)         │   │
//! │                                 └──────────────┬───────────────┘   │
//! │                                                │                   │
//! │                                                ▼                   │
//! │                                 ┌──────────────────────────────┐   │
//! │                                 │ OrderedStore (SkipMap)       │   │
//! │                                 └──────────────────────────────┘   │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use tidekv::config::ServerConfig;
//! use tidekv::server::Server;
//!
//! fn main() -> Result<(), tidekv::server::ServerError> {
//!     let server = Server::bind(ServerConfig::new(8080).with_workers(4))?;
//!     let shutdown = server.shutdown_handle();
//!
//!     std::thread::spawn(move || {
//!         std::thread::sleep(std::time::Duration::from_secs(60));
//!         shutdown.shutdown();
//!     });
//!
//!     server.run()
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire codec, `Task` and `OpKind`
//! - [`connection`]: per-socket buffers and framing
//! - [`storage`]: the ordered store
//! - [`commands`]: applies tasks to the store
//! - [`server`]: acceptor, reactors and executors
//! - [`client`]: async request/response client
//! - [`config`]: server settings
//!
//! ## Ordering
//!
//! Each reactor submits batches to its own FIFO executor and keeps the
//! returned completion handles in a FIFO queue. It only ever pops completed
//! handles from the front, so a connection's responses come back in request
//! order even when many connections share the reactor.

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{ClientError, KvClient};
pub use commands::CommandHandler;
pub use config::ServerConfig;
pub use connection::ConnectionStats;
pub use protocol::{CodecError, OpKind, Outcome, Task};
pub use server::{Server, ServerError, ShutdownHandle};
pub use storage::OrderedStore;

/// The default port tidekv listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default host tidekv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Reactor threads started when no worker count is given
pub const DEFAULT_WORKERS: usize = 4;

/// Version of tidekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
