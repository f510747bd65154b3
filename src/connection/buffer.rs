//! Per-Connection Buffers and Framing
//!
//! TCP is a stream protocol: one read may carry half a request, exactly one,
//! or several back to back. `ConnectionBuffer` accumulates input bytes and
//! hands out whole requests as they become available, and accumulates
//! encoded responses until the socket accepts them.
//!
//! ## Input Region
//!
//! ```text
//!  ┌──────────── capacity ─────────────┐
//!  │ msg 1 complete │ msg 2 part │ free │
//!  └───────────────────────────────────┘
//!         │
//!         │ take_message()
//!         ▼
//!  ┌───────────────────────────────────┐
//!  │ msg 2 part │       free           │
//!  └───────────────────────────────────┘
//! ```
//!
//! The input region never holds more than `capacity` bytes. A request whose
//! declared length exceeds the capacity can never become ready, so it is
//! reported as [`FrameError::MessageTooLarge`] as soon as its header arrives.
//!
//! ## Output Region
//!
//! Responses are appended in order and drained by [`ConnectionBuffer::flush_to`],
//! which writes as much as the sink accepts and keeps the rest at the front.
//! The output region starts at `capacity` and grows when a backlog needs it.

use crate::protocol::{decode_frame, encode_response, frame_len, CodecError, Task, HEADER_LEN};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Default capacity of each buffer region (1 KiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Size of the scratch buffer used for a single socket read
const READ_CHUNK_SIZE: usize = 4096;

/// Errors raised while framing requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A request declares more bytes than the input region can ever hold
    #[error("message too large: {size} bytes (capacity: {capacity})")]
    MessageTooLarge { size: usize, capacity: usize },

    /// Appending would exceed the input region
    #[error("input overflow: {incoming} bytes offered, {remaining} bytes free")]
    Overflow { incoming: usize, remaining: usize },

    /// `take_message` was called before a whole request was buffered
    #[error("no complete message buffered")]
    NotReady,

    /// The buffered frame could not be decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Input and output byte regions for one client connection.
#[derive(Debug)]
pub struct ConnectionBuffer {
    /// Bytes read from the socket but not yet framed
    input: BytesMut,

    /// Encoded responses not yet written to the socket
    output: BytesMut,

    /// Maximum number of bytes the input region may hold
    capacity: usize,
}

impl Default for ConnectionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl ConnectionBuffer {
    /// Creates a buffer pair whose input region holds at most `capacity` bytes.
    ///
    /// The capacity is raised to at least one request header, so a full input
    /// region always holds a complete request or an oversized declaration.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(HEADER_LEN);
        Self {
            input: BytesMut::with_capacity(capacity),
            output: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the input region's capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of input bytes waiting to be framed.
    pub fn buffered(&self) -> usize {
        self.input.len()
    }

    /// Returns how many more input bytes fit before the region is full.
    pub fn remaining(&self) -> usize {
        self.capacity - self.input.len()
    }

    /// Appends newly-read bytes to the input region.
    pub fn append(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if data.len() > self.remaining() {
            return Err(FrameError::Overflow {
                incoming: data.len(),
                remaining: self.remaining(),
            });
        }
        self.input.extend_from_slice(data);
        Ok(())
    }

    /// Performs one read from `src` into the free part of the input region.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream. Callers
    /// must make sure [`remaining`](Self::remaining) is non-zero first.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let limit = self.remaining().min(READ_CHUNK_SIZE);

        let n = src.read(&mut chunk[..limit])?;
        self.input.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Length of the request at the front of the input region, once its header is in.
    fn pending_frame_len(&self) -> Result<Option<usize>, FrameError> {
        match frame_len(&self.input) {
            Some(size) if size > self.capacity => Err(FrameError::MessageTooLarge {
                size,
                capacity: self.capacity,
            }),
            other => Ok(other),
        }
    }

    /// Returns true iff the header and the whole declared message are buffered.
    pub fn message_ready(&self) -> bool {
        matches!(self.pending_frame_len(), Ok(Some(len)) if self.input.len() >= len)
    }

    /// Checks the pending request header against the input capacity.
    pub fn check_frame(&self) -> Result<(), FrameError> {
        self.pending_frame_len().map(|_| ())
    }

    /// Consumes exactly one framed request and returns it as a task.
    ///
    /// The consumed bytes are removed from the front of the input region, so
    /// the trailing bytes of the next request keep their place.
    pub fn take_message(&mut self) -> Result<Task, FrameError> {
        let len = match self.pending_frame_len()? {
            Some(len) if self.input.len() >= len => len,
            _ => return Err(FrameError::NotReady),
        };

        let frame = self.input.split_to(len).freeze();
        Ok(decode_frame(frame)?)
    }

    /// Takes every complete request currently buffered, appending them to `tasks`.
    ///
    /// Returns how many tasks were appended. Fails once the pending header
    /// declares a message that can never fit.
    pub fn drain_tasks(&mut self, tasks: &mut Vec<Task>) -> Result<usize, FrameError> {
        let before = tasks.len();
        while self.message_ready() {
            tasks.push(self.take_message()?);
        }
        self.check_frame()?;
        Ok(tasks.len() - before)
    }

    /// Appends one encoded response slot to the output region.
    pub fn push_response(&mut self, outcome: Option<&[u8]>) -> Result<(), CodecError> {
        encode_response(&mut self.output, outcome)
    }

    /// Returns the number of response bytes waiting to be written.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Returns true if responses are waiting to be written.
    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Writes as much of the output region as `dst` accepts.
    ///
    /// Returns `true` once the output region is fully drained and `false` if
    /// the sink stopped accepting bytes (`WouldBlock`).
    pub fn flush_to<W: Write>(&mut self, dst: &mut W) -> io::Result<bool> {
        while !self.output.is_empty() {
            match dst.write(&self.output) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ));
                }
                Ok(n) => self.output.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
