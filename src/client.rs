//! Request/response client.
//!
//! Each call writes one request and then reads until one full
//! length-prefixed response is buffered. Works over any async stream, so
//! tests can drive it with `tokio_test::io` mocks.
//!
//! ```ignore
//! use tidekv::client::KvClient;
//!
//! let mut client = KvClient::connect("127.0.0.1:8080").await?;
//! client.put("name", "tide").await?;
//! assert_eq!(client.get("name").await?.as_deref(), Some(&b"tide"[..]));
//! ```

use crate::protocol::{decode_response, encode_request, CodecError, OpKind, Outcome, Task};
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

/// Errors returned by [`KvClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request could not be encoded
    #[error("invalid request: {0}")]
    Codec(#[from] CodecError),

    /// The server closed the connection before answering
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server closed the connection partway through a response
    #[error("truncated response ({buffered} bytes buffered)")]
    MalformedResponse { buffered: usize },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A client connection to a server.
pub struct KvClient<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
}

impl KvClient<TcpStream> {
    /// Connects to a server.
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> KvClient<S> {
    /// Wraps an already connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Looks up a key.
    pub async fn get(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Outcome> {
        self.request(OpKind::Get, key.as_ref(), None).await
    }

    /// Stores a value; the server echoes it back.
    pub async fn put(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<Outcome> {
        self.request(OpKind::Put, key.as_ref(), Some(value.as_ref()))
            .await
    }

    /// Removes a key, returning the value it held.
    pub async fn delete(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Outcome> {
        self.request(OpKind::Delete, key.as_ref(), None).await
    }

    /// Sends several requests in one write and reads their responses in order.
    pub async fn pipeline(&mut self, tasks: &[Task]) -> ClientResult<Vec<Outcome>> {
        let mut out = BytesMut::new();
        for task in tasks {
            out.extend_from_slice(&task.encode()?);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        let mut outcomes = Vec::with_capacity(tasks.len());
        for _ in tasks {
            outcomes.push(self.read_response().await?);
        }
        Ok(outcomes)
    }

    async fn request(
        &mut self,
        kind: OpKind,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> ClientResult<Outcome> {
        let frame = encode_request(kind, key, value)?;
        trace!(op = %kind, bytes = frame.len(), "Sending request");

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> ClientResult<Outcome> {
        loop {
            if let Some((outcome, used)) = decode_response(&self.buffer) {
                self.buffer.advance(used);
                return Ok(outcome);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(if self.buffer.is_empty() {
                    ClientError::ConnectionClosed
                } else {
                    ClientError::MalformedResponse {
                        buffered: self.buffer.len(),
                    }
                });
            }
        }
    }
}
