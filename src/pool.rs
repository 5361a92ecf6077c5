//! Bounded worker pool used to fan requests out to worker threads.
//!
//! The pool is a fixed set of worker threads draining a bounded FIFO job
//! queue. Submission applies back-pressure when the queue is full: either
//! block the caller until a slot frees, or reject immediately, depending on
//! the policy chosen at construction. Shutdown comes in two flavors:
//! graceful (drain the queue first) and immediate (discard undequeued jobs).
//!
//! The queue lock is held only for pointer and counter updates, never while
//! a job runs, so up to `workers` jobs execute in true parallel while the
//! queue still provides FIFO fairness and exact back-pressure.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A unit of work: a closure executed once on a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is at capacity and the pool is in non-blocking mode.
    QueueFull,
    /// The pool has been closed or is shutting down; the job was not enqueued.
    ShuttingDown,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "job queue is full"),
            SubmitError::ShuttingDown => write!(f, "worker pool is shutting down"),
        }
    }
}

impl std::error::Error for SubmitError {}

struct QueueState {
    queue: VecDeque<Job>,
    /// Closed queues accept no new submissions. Only transitions false -> true.
    closed: bool,
    /// Set once all workers should exit. Only transitions false -> true.
    shutting_down: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signaled when a job is enqueued.
    not_empty: Condvar,
    /// Signaled when a dequeue frees a slot under the blocking policy.
    not_full: Condvar,
    /// Signaled when a dequeue empties the queue.
    empty: Condvar,
    capacity: usize,
    block_when_full: bool,
}

/// Fixed-size pool of worker threads behind a bounded FIFO job queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` worker threads draining a queue bounded at `capacity`.
    ///
    /// With `block_when_full`, [`submit`](Self::submit) blocks the caller
    /// until a slot frees; otherwise it rejects with
    /// [`SubmitError::QueueFull`]. Thread spawn failure aborts construction;
    /// any workers already spawned are shut down and joined before the error
    /// is returned.
    pub fn new(workers: usize, capacity: usize, block_when_full: bool) -> io::Result<WorkerPool> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                shutting_down: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            empty: Condvar::new(),
            capacity,
            block_when_full,
        });

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("pool-worker-{id}"))
                .spawn(move || worker_loop(id, worker_shared));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    let pool = WorkerPool {
                        shared,
                        workers: Mutex::new(handles),
                    };
                    pool.shutdown(false);
                    return Err(e);
                }
            }
        }

        Ok(WorkerPool {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Enqueue a job for execution by a worker thread.
    ///
    /// Blocks while the queue is full under the blocking policy; rejects
    /// immediately otherwise. A pool that closed while the caller was
    /// blocked rejects with [`SubmitError::ShuttingDown`] and the job is
    /// never enqueued.
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.queue.len() == self.shared.capacity && !self.shared.block_when_full {
            return Err(SubmitError::QueueFull);
        }

        while state.queue.len() == self.shared.capacity && !state.closed && !state.shutting_down {
            state = self
                .shared
                .not_full
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }

        if state.closed || state.shutting_down {
            return Err(SubmitError::ShuttingDown);
        }

        state.queue.push_back(job);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Number of jobs waiting in the queue (excludes jobs already executing).
    pub fn queued(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queue
            .len()
    }

    /// Shut the pool down and join every worker thread. Idempotent.
    ///
    /// Closes the queue to new submissions, then, if `drain` is set, waits
    /// for workers to empty the queue before raising the shutdown flag. Jobs
    /// still queued when the flag goes up are discarded, not executed.
    pub fn shutdown(&self, drain: bool) {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed || state.shutting_down {
                return;
            }
            state.closed = true;

            if drain {
                while !state.queue.is_empty() {
                    state = self
                        .shared
                        .empty
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }

            let discarded = state.queue.len();
            if discarded > 0 {
                debug!(discarded, "Discarding queued jobs on immediate shutdown");
            }
            state.shutting_down = true;
        }

        // Wake blocked workers and blocked submitters so both observe the flag.
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if handle.join().is_err() {
                warn!("A worker thread panicked before shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

/// Per-worker loop: wait for a job, run it outside the lock, repeat until
/// the shutdown flag is observed.
fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());

            while state.queue.is_empty() && !state.shutting_down {
                state = shared
                    .not_empty
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }

            // Checked before dequeuing: an immediate shutdown discards
            // whatever is still queued.
            if state.shutting_down {
                debug!(worker = id, "Worker exiting");
                return;
            }

            let job = state.queue.pop_front().expect("queue checked non-empty");

            if state.queue.is_empty() {
                shared.empty.notify_all();
            }
            if shared.block_when_full && state.queue.len() == shared.capacity - 1 {
                shared.not_full.notify_one();
            }

            job
        };

        job();
    }
}
