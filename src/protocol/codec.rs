//! Binary Request/Response Codec
//!
//! Pure functions that turn requests and responses into wire bytes and back.
//!
//! Decoding follows the same convention as the rest of the crate:
//! - `Ok(Some((value, consumed)))` - a complete message was decoded
//! - `Ok(None)` - the buffer holds only part of a message
//! - `Err(CodecError)` - the input can never be encoded or decoded
//!
//! Decoding never reads past the lengths declared in the header.

use crate::protocol::types::{
    OpKind, Outcome, Task, HEADER_LEN, MAX_FIELD_LEN, RESPONSE_HEADER_LEN, SENTINEL,
};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The key does not fit in a u16 length field
    #[error("key too long: {len} bytes (max: {max})", max = MAX_FIELD_LEN)]
    KeyTooLong { len: usize },

    /// The value does not fit in a u16 length field
    #[error("value too long: {len} bytes (max: {max})", max = MAX_FIELD_LEN)]
    ValueTooLong { len: usize },

    /// PUT needs a non-empty value; a zero value length means GET on the wire
    #[error("PUT requires a non-empty value")]
    MissingValue,

    /// A frame handed to the decoder is shorter than its header declares
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

fn check_key(key: &[u8]) -> CodecResult<()> {
    if key.len() > MAX_FIELD_LEN {
        return Err(CodecError::KeyTooLong { len: key.len() });
    }
    Ok(())
}

fn check_value(value: &[u8]) -> CodecResult<()> {
    if value.len() > MAX_FIELD_LEN {
        return Err(CodecError::ValueTooLong { len: value.len() });
    }
    Ok(())
}

/// Encodes a request into `u16 keyLen | u16 valueLenOrSentinel | key | value?`.
///
/// GET and DELETE ignore `value`. PUT requires a value of 1..=65534 bytes.
pub fn encode_request(kind: OpKind, key: &[u8], value: Option<&[u8]>) -> CodecResult<Bytes> {
    check_key(key)?;

    let (field, payload): (u16, &[u8]) = match kind {
        OpKind::Get => (0, &[]),
        OpKind::Delete => (SENTINEL, &[]),
        OpKind::Put => {
            let value = value.ok_or(CodecError::MissingValue)?;
            check_value(value)?;
            if value.is_empty() {
                return Err(CodecError::MissingValue);
            }
            (value.len() as u16, value)
        }
    };

    let mut out = BytesMut::with_capacity(HEADER_LEN + key.len() + payload.len());
    out.put_u16(key.len() as u16);
    out.put_u16(field);
    out.put_slice(key);
    out.put_slice(payload);
    Ok(out.freeze())
}

impl Task {
    /// Encodes this task as a request message.
    pub fn encode(&self) -> CodecResult<Bytes> {
        encode_request(self.kind, &self.key, self.value.as_deref())
    }
}

/// Reads the two header fields, if present.
#[inline]
fn read_header(buf: &[u8]) -> Option<(u16, u16)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let key_len = u16::from_be_bytes([buf[0], buf[1]]);
    let value_field = u16::from_be_bytes([buf[2], buf[3]]);
    Some((key_len, value_field))
}

/// Total length of the request starting at `buf[0]`, once its header is buffered.
///
/// Returns `None` while fewer than 4 header bytes are available. The
/// returned length may exceed `buf.len()`.
#[inline]
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    read_header(buf)
        .map(|(key_len, field)| HEADER_LEN + key_len as usize + OpKind::value_len(field))
}

/// Decodes exactly one request from a frame produced by [`frame_len`].
///
/// Key and value are sliced out of `frame` without copying.
pub fn decode_frame(frame: Bytes) -> CodecResult<Task> {
    let needed = frame_len(&frame).unwrap_or(HEADER_LEN);
    if frame.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: frame.len(),
        });
    }

    // frame_len succeeded, so the header is present
    let key_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let field = u16::from_be_bytes([frame[2], frame[3]]);
    let kind = OpKind::from_value_field(field);

    let key_end = HEADER_LEN + key_len;
    let key = frame.slice(HEADER_LEN..key_end);
    let value = match kind {
        OpKind::Put => Some(frame.slice(key_end..key_end + field as usize)),
        OpKind::Get | OpKind::Delete => None,
    };

    Ok(Task { kind, key, value })
}

/// Decodes one request starting at `offset`.
///
/// Returns the task and the number of bytes it occupied, or `None` if the
/// buffer does not yet hold the whole message.
pub fn decode_request(buf: &[u8], offset: usize) -> CodecResult<Option<(Task, usize)>> {
    let rest = buf.get(offset..).unwrap_or(&[]);
    let len = match frame_len(rest) {
        Some(len) if rest.len() >= len => len,
        _ => return Ok(None),
    };

    let task = decode_frame(Bytes::copy_from_slice(&rest[..len]))?;
    Ok(Some((task, len)))
}

/// Appends one response slot: `u16 len | bytes`, or `0xFFFF` for no value.
pub fn encode_response(out: &mut BytesMut, outcome: Option<&[u8]>) -> CodecResult<()> {
    match outcome {
        Some(value) => {
            check_value(value)?;
            out.reserve(RESPONSE_HEADER_LEN + value.len());
            out.put_u16(value.len() as u16);
            out.put_slice(value);
        }
        None => out.put_u16(SENTINEL),
    }
    Ok(())
}

/// Decodes one response slot from the front of `buf`.
pub fn decode_response(buf: &[u8]) -> Option<(Outcome, usize)> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return None;
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]);
    if len == SENTINEL {
        return Some((None, RESPONSE_HEADER_LEN));
    }

    let end = RESPONSE_HEADER_LEN + len as usize;
    if buf.len() < end {
        return None;
    }
    Some((
        Some(Bytes::copy_from_slice(&buf[RESPONSE_HEADER_LEN..end])),
        end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_put_layout() {
        let bytes = encode_request(OpKind::Put, b"a", Some(b"1".as_slice())).unwrap();
        assert_eq!(&bytes[..], &[0, 1, 0, 1, b'a', b'1']);
    }

    #[test]
    fn test_encode_get_and_delete_layout() {
        let get = encode_request(OpKind::Get, b"key", Some(b"ignored".as_slice())).unwrap();
        assert_eq!(&get[..], &[0, 3, 0, 0, b'k', b'e', b'y']);

        let del = encode_request(OpKind::Delete, b"key", None).unwrap();
        assert_eq!(&del[..], &[0, 3, 0xFF, 0xFF, b'k', b'e', b'y']);
    }

    #[test]
    fn test_round_trip_each_kind() {
        for task in [
            Task::put("user:1", "alice"),
            Task::get("user:1"),
            Task::delete("user:1"),
        ] {
            let encoded = task.encode().unwrap();
            let (decoded, consumed) = decode_request(&encoded, 0).unwrap().unwrap();
            assert_eq!(decoded, task);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_binary_key_and_value() {
        let task = Task::put(vec![0u8, 0xFF, 0x80], vec![0xFFu8, 0xFF]);
        let encoded = task.encode().unwrap();
        let (decoded, _) = decode_request(&encoded, 0).unwrap().unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_empty_key_is_allowed() {
        let encoded = Task::get("").encode().unwrap();
        assert_eq!(encoded.len(), HEADER_LEN);
        let (decoded, _) = decode_request(&encoded, 0).unwrap().unwrap();
        assert_eq!(decoded, Task::get(""));
    }

    #[test]
    fn test_max_length_fields() {
        let key = vec![b'k'; MAX_FIELD_LEN];
        let value = vec![b'v'; MAX_FIELD_LEN];
        let task = Task::put(key, value);
        let encoded = task.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_LEN + 2 * MAX_FIELD_LEN);

        let (decoded, consumed) = decode_request(&encoded, 0).unwrap().unwrap();
        assert_eq!(decoded, task);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_oversized_fields_rejected() {
        let big = vec![0u8; MAX_FIELD_LEN + 1];

        assert_eq!(
            encode_request(OpKind::Get, &big, None),
            Err(CodecError::KeyTooLong { len: 65535 })
        );
        assert_eq!(
            encode_request(OpKind::Put, b"k", Some(big.as_slice())),
            Err(CodecError::ValueTooLong { len: 65535 })
        );
    }

    #[test]
    fn test_put_requires_value() {
        assert_eq!(
            encode_request(OpKind::Put, b"k", None),
            Err(CodecError::MissingValue)
        );
        assert_eq!(
            encode_request(OpKind::Put, b"k", Some(b"".as_slice())),
            Err(CodecError::MissingValue)
        );
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = Task::put("key", "value").encode().unwrap();

        assert_eq!(decode_request(&encoded[..3], 0).unwrap(), None);
        assert_eq!(decode_request(&encoded[..encoded.len() - 1], 0).unwrap(), None);
        assert_eq!(decode_request(&[], 0).unwrap(), None);
    }

    #[test]
    fn test_decode_at_offset() {
        let first = Task::put("a", "1").encode().unwrap();
        let second = Task::delete("b").encode().unwrap();
        let mut buf = first.to_vec();
        buf.extend_from_slice(&second);

        let (task, consumed) = decode_request(&buf, 0).unwrap().unwrap();
        assert_eq!(task, Task::put("a", "1"));

        let (task, used) = decode_request(&buf, consumed).unwrap().unwrap();
        assert_eq!(task, Task::delete("b"));
        assert_eq!(consumed + used, buf.len());

        assert_eq!(decode_request(&buf, buf.len() + 10).unwrap(), None);
    }

    #[test]
    fn test_decode_does_not_read_past_declared_length() {
        let mut buf = Task::get("k").encode().unwrap().to_vec();
        buf.extend_from_slice(b"trailing garbage");

        let (task, consumed) = decode_request(&buf, 0).unwrap().unwrap();
        assert_eq!(task, Task::get("k"));
        assert_eq!(consumed, HEADER_LEN + 1);
    }

    #[test]
    fn test_decode_frame_truncated() {
        let encoded = Task::put("key", "value").encode().unwrap();
        let err = decode_frame(encoded.slice(..6)).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: encoded.len(),
                available: 6
            }
        );
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(&[0, 2]), None);
        assert_eq!(frame_len(&[0, 2, 0, 0]), Some(6));
        assert_eq!(frame_len(&[0, 2, 0xFF, 0xFF]), Some(6));
        assert_eq!(frame_len(&[0, 2, 0, 3]), Some(9));
    }

    #[test]
    fn test_response_encoding() {
        let mut out = BytesMut::new();
        encode_response(&mut out, Some(b"1".as_slice())).unwrap();
        encode_response(&mut out, None).unwrap();
        encode_response(&mut out, Some(b"".as_slice())).unwrap();
        assert_eq!(&out[..], &[0, 1, b'1', 0xFF, 0xFF, 0, 0]);

        let (first, n1) = decode_response(&out).unwrap();
        assert_eq!(first, Some(Bytes::from("1")));
        let (second, n2) = decode_response(&out[n1..]).unwrap();
        assert_eq!(second, None);
        let (third, n3) = decode_response(&out[n1 + n2..]).unwrap();
        assert_eq!(third, Some(Bytes::new()));
        assert_eq!(n1 + n2 + n3, out.len());
    }

    #[test]
    fn test_decode_response_incomplete() {
        assert_eq!(decode_response(&[0]), None);
        assert_eq!(decode_response(&[0, 3, b'a', b'b']), None);
    }
}
