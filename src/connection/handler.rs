//! Connection State
//!
//! A `Connection` is one accepted socket plus its [`ConnectionBuffer`]. It is
//! owned by exactly one reactor for its whole life and never shared.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Acceptor accepts the socket
//!        │
//!        ▼
//! 2. Reactor registers it (read + write interest)
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  readable: read_tasks()      │──> batch to the executor
//!    │  result ready: queue_outcomes│
//!    │  writable: flush()           │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF / I/O error / framing error
//!        │
//!        ▼
//! 5. Registration cancelled, buffers dropped
//! ```

use crate::connection::buffer::{ConnectionBuffer, FrameError};
use crate::protocol::{CodecError, Outcome, Task};
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Statistics for connection handling, shared by every reactor.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests answered
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn commands_processed(&self, count: usize) {
        self.commands_processed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns the number of currently open connections.
    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Framing error (oversized or malformed request)
    #[error("Framing error: {0}")]
    FrameError(#[from] FrameError),

    /// A response could not be encoded
    #[error("Encoding error: {0}")]
    CodecError(#[from] CodecError),
}

/// The tasks framed by one readiness event.
#[derive(Debug, Default)]
pub struct ReadBatch {
    /// Complete requests, in arrival order
    pub tasks: Vec<Task>,
    /// The peer closed its write half
    pub eof: bool,
}

/// One client connection owned by a reactor.
pub struct Connection<S = TcpStream> {
    /// Registration token; never reused within a reactor
    pub token: Token,

    /// The peer's address (for logging)
    pub addr: SocketAddr,

    /// Transport handle
    pub stream: S,

    /// Input/output regions and framing state
    pub buffer: ConnectionBuffer,

    /// Whether write readiness is currently requested
    wants_write: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Creates a connection. Write interest starts enabled.
    pub fn new(token: Token, addr: SocketAddr, stream: S, capacity: usize) -> Self {
        Self {
            token,
            addr,
            stream,
            buffer: ConnectionBuffer::new(capacity),
            wants_write: true,
        }
    }

    /// Reads everything the socket has available and frames it.
    ///
    /// Reads until the socket would block or reports end of stream. A single
    /// call may yield zero, one, or many tasks.
    pub fn read_tasks(&mut self, stats: &ConnectionStats) -> Result<ReadBatch, ConnectionError> {
        let mut batch = ReadBatch::default();

        loop {
            match self.buffer.read_from(&mut self.stream) {
                Ok(0) => {
                    batch.eof = true;
                    break;
                }
                Ok(n) => {
                    stats.bytes_read(n);
                    self.buffer.drain_tasks(&mut batch.tasks)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        trace!(
            client = %self.addr,
            tasks = batch.tasks.len(),
            buffered = self.buffer.buffered(),
            "Read data"
        );
        Ok(batch)
    }

    /// Appends one response slot per outcome to the output region.
    pub fn queue_outcomes(&mut self, outcomes: &[Outcome]) -> Result<(), ConnectionError> {
        for outcome in outcomes {
            self.buffer.push_response(outcome.as_deref())?;
        }
        Ok(())
    }

    /// Writes as much pending output as the socket accepts.
    ///
    /// Returns `true` once everything has been written.
    pub fn flush(&mut self, stats: &ConnectionStats) -> Result<bool, ConnectionError> {
        let before = self.buffer.pending_output();
        let drained = self.buffer.flush_to(&mut self.stream)?;
        let written = before - self.buffer.pending_output();

        if written > 0 {
            stats.bytes_written(written);
            trace!(client = %self.addr, bytes = written, "Sent responses");
        }
        Ok(drained)
    }

    /// Returns whether write readiness is currently requested.
    pub fn wants_write(&self) -> bool {
        self.wants_write
    }

    /// Records the write interest; returns true if it changed.
    pub fn set_wants_write(&mut self, wants_write: bool) -> bool {
        let changed = self.wants_write != wants_write;
        self.wants_write = wants_write;
        changed
    }

    /// Returns the interest flags this connection should be registered with.
    pub fn interest(&self) -> Interest {
        if self.wants_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::VecDeque;

    /// A scripted non-blocking stream.
    #[derive(Default)]
    struct MockStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        write_limit: Option<usize>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    assert!(data.len() <= buf.len(), "script chunk larger than buffer");
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.write_limit {
                Some(0) => Err(io::ErrorKind::WouldBlock.into()),
                Some(limit) => {
                    let n = buf.len().min(limit);
                    self.write_limit = Some(limit - n);
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn connection(stream: MockStream, capacity: usize) -> Connection<MockStream> {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        Connection::new(Token(1), addr, stream, capacity)
    }

    fn encoded(tasks: &[Task]) -> Vec<u8> {
        tasks
            .iter()
            .flat_map(|t| t.encode().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_read_multiple_tasks_across_reads() {
        let bytes = encoded(&[Task::put("a", "1"), Task::get("a"), Task::delete("a")]);
        let mut stream = MockStream::default();
        stream.reads.push_back(Ok(bytes[..5].to_vec()));
        stream.reads.push_back(Ok(bytes[5..].to_vec()));

        let stats = ConnectionStats::new();
        let mut conn = connection(stream, 1024);
        let batch = conn.read_tasks(&stats).unwrap();

        assert!(!batch.eof);
        assert_eq!(
            batch.tasks,
            vec![Task::put("a", "1"), Task::get("a"), Task::delete("a")]
        );
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), bytes.len() as u64);
    }

    #[test]
    fn test_read_eof_keeps_framed_tasks() {
        let mut stream = MockStream::default();
        stream.reads.push_back(Ok(encoded(&[Task::put("k", "v")])));
        stream.reads.push_back(Ok(Vec::new()));

        let mut conn = connection(stream, 1024);
        let batch = conn.read_tasks(&ConnectionStats::new()).unwrap();

        assert!(batch.eof);
        assert_eq!(batch.tasks, vec![Task::put("k", "v")]);
    }

    #[test]
    fn test_read_error_propagates() {
        let mut stream = MockStream::default();
        stream
            .reads
            .push_back(Err(io::ErrorKind::ConnectionReset.into()));

        let mut conn = connection(stream, 1024);
        let err = conn.read_tasks(&ConnectionStats::new()).unwrap_err();
        assert!(matches!(err, ConnectionError::IoError(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut stream = MockStream::default();
        stream.reads.push_back(Ok(vec![0, 200, 0, 0]));

        let mut conn = connection(stream, 64);
        let err = conn.read_tasks(&ConnectionStats::new()).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::FrameError(FrameError::MessageTooLarge { size: 204, .. })
        ));
    }

    #[test]
    fn test_full_buffer_frees_after_each_request() {
        let frame = encoded(&[Task::put("a", "1")]);
        let mut stream = MockStream::default();
        stream.reads.push_back(Ok(frame.clone()));
        stream.reads.push_back(Ok(frame.clone()));
        stream.reads.push_back(Ok(frame[..3].to_vec()));

        let mut conn = connection(stream, frame.len());
        let batch = conn.read_tasks(&ConnectionStats::new()).unwrap();

        assert!(!batch.eof);
        assert_eq!(batch.tasks, vec![Task::put("a", "1"), Task::put("a", "1")]);
        assert_eq!(conn.buffer.buffered(), 3);
    }

    #[test]
    fn test_queue_and_flush() {
        let stats = ConnectionStats::new();
        let mut conn = connection(MockStream::default(), 1024);

        conn.queue_outcomes(&[Some(Bytes::from("1")), None]).unwrap();
        assert!(conn.flush(&stats).unwrap());
        assert_eq!(conn.stream.written, vec![0, 1, b'1', 0xFF, 0xFF]);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_partial_flush() {
        let stats = ConnectionStats::new();
        let stream = MockStream {
            write_limit: Some(2),
            ..Default::default()
        };
        let mut conn = connection(stream, 1024);

        conn.queue_outcomes(&[Some(Bytes::from("abc"))]).unwrap();
        assert!(!conn.flush(&stats).unwrap());
        assert_eq!(conn.buffer.pending_output(), 3);

        conn.stream.write_limit = None;
        assert!(conn.flush(&stats).unwrap());
        assert_eq!(conn.stream.written, vec![0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_interest_tracking() {
        let mut conn = connection(MockStream::default(), 1024);
        assert_eq!(conn.interest(), Interest::READABLE | Interest::WRITABLE);

        assert!(conn.set_wants_write(false));
        assert!(!conn.set_wants_write(false));
        assert!(!conn.wants_write());
        assert_eq!(conn.interest(), Interest::READABLE);
    }

    #[test]
    fn test_stats_counters() {
        let stats = ConnectionStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.commands_processed(3);

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active(), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 3);
    }
}
