//! Connection Module
//!
//! Per-client state owned by a reactor: the socket, its input/output
//! buffers, and the framing state machine that turns a byte stream into
//! whole requests.
//!
//! ## Architecture
//!
//! ```text
//!     socket bytes
//!          │
//!          ▼
//! ┌──────────────────────────────┐
//! │ ConnectionBuffer (input)     │  message_ready() / take_message()
//! └──────────────┬───────────────┘
//!                │ Vec<Task>
//!                ▼
//!          reactor executor
//!                │ Vec<Outcome>
//!                ▼
//! ┌──────────────────────────────┐
//! │ ConnectionBuffer (output)    │  push_response() / flush_to()
//! └──────────────┬───────────────┘
//!                ▼
//!          socket bytes
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::connection::ConnectionBuffer;
//! use tidekv::protocol::Task;
//!
//! let mut buffer = ConnectionBuffer::default();
//! let bytes = Task::get("name").encode().unwrap();
//!
//! buffer.append(&bytes[..2]).unwrap();
//! assert!(!buffer.message_ready());
//!
//! buffer.append(&bytes[2..]).unwrap();
//! assert!(buffer.message_ready());
//! assert_eq!(buffer.take_message().unwrap(), Task::get("name"));
//! ```

pub mod buffer;
pub mod handler;

// Re-export commonly used types
pub use buffer::{ConnectionBuffer, FrameError, DEFAULT_BUFFER_CAPACITY};
pub use handler::{Connection, ConnectionError, ConnectionStats, ReadBatch};
