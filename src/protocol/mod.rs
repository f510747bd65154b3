//! tidekv Wire Protocol
//!
//! A length-prefixed binary protocol with three operations: GET, PUT and DELETE.
//!
//! ## Modules
//!
//! - `types`: `OpKind`, `Task` and the protocol constants
//! - `codec`: request/response encoding and decoding
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{decode_request, Task};
//!
//! let bytes = Task::put("name", "tide").encode().unwrap();
//! let (task, consumed) = decode_request(&bytes, 0).unwrap().unwrap();
//! assert_eq!(task, Task::put("name", "tide"));
//! assert_eq!(consumed, bytes.len());
//! ```

pub mod codec;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{
    decode_frame, decode_request, decode_response, encode_request, encode_response, frame_len,
    CodecError, CodecResult,
};
pub use types::{OpKind, Outcome, Task, HEADER_LEN, MAX_FIELD_LEN, SENTINEL};
