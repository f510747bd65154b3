//! Wire Protocol Data Types
//!
//! This module defines the values that travel over the tidekv wire protocol.
//!
//! ## Request Format
//!
//! Every request starts with a fixed 4-byte header, big-endian:
//!
//! ```text
//! ┌────────────┬──────────────────────┬──────────────┬────────────────┐
//! │ u16 keyLen │ u16 valueLenOrMarker │ key[keyLen]  │ value[valueLen]│
//! └────────────┴──────────────────────┴──────────────┴────────────────┘
//!
//! valueLenOrMarker == 0x0000  -> GET    (no value bytes follow)
//! valueLenOrMarker == 0xFFFF  -> DELETE (no value bytes follow)
//! otherwise                   -> PUT    (value bytes of that length follow)
//! ```
//!
//! ## Response Format
//!
//! One slot per request, in request order: `u16 len | bytes[len]`, or the
//! lone `0xFFFF` marker for "no value".

use bytes::Bytes;
use std::fmt;

/// Size of the fixed request header (two u16 length fields).
pub const HEADER_LEN: usize = 4;

/// Size of a response length prefix.
pub const RESPONSE_HEADER_LEN: usize = 2;

/// Reserved length value. Marks DELETE on requests and "absent" on responses.
pub const SENTINEL: u16 = 0xFFFF;

/// Largest key or value the protocol can carry.
pub const MAX_FIELD_LEN: usize = SENTINEL as usize - 1;

/// The operation a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Look up a key.
    Get,
    /// Insert or overwrite a key.
    Put,
    /// Remove a key.
    Delete,
}

impl OpKind {
    /// Maps the header's value-length field to an operation.
    #[inline]
    pub fn from_value_field(field: u16) -> Self {
        match field {
            0 => OpKind::Get,
            SENTINEL => OpKind::Delete,
            _ => OpKind::Put,
        }
    }

    /// Number of value bytes that follow the key for a given header field.
    #[inline]
    pub fn value_len(field: u16) -> usize {
        match Self::from_value_field(field) {
            OpKind::Put => field as usize,
            OpKind::Get | OpKind::Delete => 0,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Get => "GET",
            OpKind::Put => "PUT",
            OpKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One decoded request: an operation, a key, and the value for PUT.
///
/// Keys and values are `Bytes` so a decoded task can share the connection
/// buffer's allocation instead of copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub kind: OpKind,
    pub key: Bytes,
    pub value: Option<Bytes>,
}

impl Task {
    /// Creates a GET task.
    pub fn get(key: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::Get,
            key: key.into(),
            value: None,
        }
    }

    /// Creates a PUT task.
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Creates a DELETE task.
    pub fn delete(key: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::Delete,
            key: key.into(),
            value: None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.kind, String::from_utf8_lossy(&self.key))?;
        if let Some(value) = &self.value {
            write!(f, " ({} bytes)", value.len())?;
        }
        Ok(())
    }
}

/// The outcome of one task: the value to report, or `None` for "no value".
pub type Outcome = Option<Bytes>;
