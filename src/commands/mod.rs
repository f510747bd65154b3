//! Command Module
//!
//! This module implements the command processing layer for tidekv.
//! It receives decoded tasks, applies them to the ordered store,
//! and returns one outcome per task.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Wire Codec      │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module, run on a reactor's executor thread)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ OrderedStore    │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
