//! Single-threaded batch executor and the in-order pending-result queue.
//!
//! Each reactor owns one `BatchExecutor`: a dedicated thread that pulls
//! batches off a FIFO channel and applies them to the store one at a time.
//! Submitting returns a `PendingResult` backed by a oneshot channel, which
//! the reactor polls with `try_recv` so its event loop never blocks.
//!
//! ```text
//!  reactor thread                      executor thread
//!  ──────────────                      ───────────────
//!  submit(batch A) ──── mpsc ────────> execute A ──┐
//!  submit(batch B) ──── mpsc ────────> execute B ─┐│
//!                                                 ││ oneshot
//!  PendingQueue [A, B] <──────────────────────────┘┘
//!  drain_ready(): pop while the head is complete
//! ```
//!
//! Because the executor is a single FIFO worker, batch B cannot finish before
//! batch A. Draining stops at the first incomplete head.

use crate::commands::CommandHandler;
use crate::protocol::{Outcome, Task};
use mio::Token;
use std::collections::VecDeque;
use std::io;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// The outcomes of one batch, addressed to the connection that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub token: Token,
    pub outcomes: Vec<Outcome>,
}

struct Job {
    token: Token,
    tasks: Vec<Task>,
    reply: oneshot::Sender<BatchResult>,
}

/// Errors raised when submitting work.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executor thread is no longer running
    #[error("executor {0} has stopped")]
    Stopped(usize),
}

/// A dedicated thread that applies batches to the store in submission order.
pub struct BatchExecutor {
    id: usize,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BatchExecutor {
    /// Starts the executor thread.
    pub fn spawn(id: usize, handler: CommandHandler) -> io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();

        let thread = thread::Builder::new()
            .name(format!("tidekv-exec-{}", id))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let outcomes = handler.execute_batch(&job.tasks);
                    // The reactor drops the receiver when it shuts down first
                    let _ = job.reply.send(BatchResult {
                        token: job.token,
                        outcomes,
                    });
                }
                debug!(executor = id, "Executor stopped");
            })?;

        Ok(Self {
            id,
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    /// Queues a batch for execution and returns a handle to its result.
    pub fn submit(&self, token: Token, tasks: Vec<Task>) -> Result<PendingResult, ExecutorError> {
        let (reply, rx) = oneshot::channel();
        let count = tasks.len();

        self.jobs
            .as_ref()
            .ok_or(ExecutorError::Stopped(self.id))?
            .send(Job {
                token,
                tasks,
                reply,
            })
            .map_err(|_| ExecutorError::Stopped(self.id))?;

        trace!(executor = self.id, token = ?token, tasks = count, "Submitted batch");
        Ok(PendingResult::new(token, rx))
    }

    /// Closes the job queue and waits for queued batches to finish.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(executor = self.id, "Executor thread panicked");
            }
        }
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A batch result that may not have been produced yet.
#[derive(Debug)]
pub struct PendingResult {
    token: Token,
    rx: oneshot::Receiver<BatchResult>,
}

impl PendingResult {
    pub(crate) fn new(token: Token, rx: oneshot::Receiver<BatchResult>) -> Self {
        Self { token, rx }
    }
}

/// FIFO of in-flight batches for one reactor.
#[derive(Debug, Default)]
pub struct PendingQueue {
    queue: VecDeque<PendingResult>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a newly submitted batch.
    pub fn push(&mut self, pending: PendingResult) {
        self.queue.push_back(pending);
    }

    /// Number of batches still in flight.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pops every completed batch from the front, in submission order.
    ///
    /// Stops at the first batch that has not completed yet.
    pub fn drain_ready(&mut self) -> Vec<BatchResult> {
        let mut ready = Vec::new();

        while let Some(head) = self.queue.front_mut() {
            match head.rx.try_recv() {
                Ok(result) => {
                    self.queue.pop_front();
                    ready.push(result);
                }
                Err(oneshot::error::TryRecvError::Empty) => break,
                Err(oneshot::error::TryRecvError::Closed) => {
                    error!(token = ?head.token, "Batch dropped by executor");
                    self.queue.pop_front();
                }
            }
        }

        ready
    }
}
