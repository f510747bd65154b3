//! Command Handler Module
//!
//! Applies decoded tasks to the ordered store.
//!
//! ## Semantics
//!
//! - `GET key` - the stored value, or no value
//! - `PUT key value` - stores the value and echoes it back
//! - `DELETE key` - removes the key and returns the value it held, or no value
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌──────────────────┐    ┌─────────────┐                    │
//! │  │ execute_batch()  │───>│  execute()  │ (in list order)    │
//! │  └──────────────────┘    └─────────────┘                    │
//! │                                 │                           │
//! │                                 ▼                           │
//! │                          OrderedStore                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{OpKind, Outcome, Task};
use crate::storage::OrderedStore;
use std::sync::Arc;
use tracing::trace;

/// Executes tasks against the shared store.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<OrderedStore>,
}

impl CommandHandler {
    /// Creates a new command handler with the given store.
    pub fn new(storage: Arc<OrderedStore>) -> Self {
        Self { storage }
    }

    /// Returns the store this handler writes to.
    pub fn storage(&self) -> &Arc<OrderedStore> {
        &self.storage
    }

    /// Executes a single task and returns its outcome.
    pub fn execute(&self, task: &Task) -> Outcome {
        match task.kind {
            OpKind::Get => self.storage.get(&task.key),
            OpKind::Put => match &task.value {
                Some(value) => Some(self.storage.put(task.key.clone(), value.clone())),
                // The decoder never builds a PUT without a value
                None => None,
            },
            OpKind::Delete => self.storage.remove(&task.key),
        }
    }

    /// Executes a batch of tasks in list order.
    ///
    /// The outcomes line up one-to-one with `tasks`.
    pub fn execute_batch(&self, tasks: &[Task]) -> Vec<Outcome> {
        let outcomes: Vec<Outcome> = tasks.iter().map(|task| self.execute(task)).collect();
        trace!(tasks = tasks.len(), "Executed batch");
        outcomes
    }
}
