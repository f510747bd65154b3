//! Storage Module
//!
//! The in-memory ordered store shared by every reactor. There is exactly one
//! instance per server; it lives for the whole process and is never persisted.
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::OrderedStore;
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let store = Arc::new(OrderedStore::new());
//! store.put(Bytes::from("name"), Bytes::from("tide"));
//! assert_eq!(store.get(b"name"), Some(Bytes::from("tide")));
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::{OrderedStore, StorageStats};
