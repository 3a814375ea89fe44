//! FIFO job queue
//!
//! Provides the shared queue that worker threads pull jobs from. Jobs run in
//! submission order; there are no priorities and no per-job cancellation.

use crate::JobError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Unique job identifier
pub type JobId = u64;

/// Boxed unit of work executed by a worker.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// A queued job
///
/// The task is opaque; [`crate::WorkerPool::spawn`] wraps user closures so
/// that their outcome is delivered through a [`crate::JobHandle`].
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    task: Task,
}

impl Job {
    /// Run the job on the current thread.
    pub fn run(self) {
        (self.task)()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Job queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed
    pub jobs_completed: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl QueueStats {
    /// Get the number of jobs submitted but not yet completed
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed
    }
}

struct QueueState {
    jobs: VecDeque<Job>,
    next_id: JobId,
    closed: bool,
    stats: QueueStats,
}

/// Thread-safe FIFO job queue
///
/// Workers block on [`JobQueue::pop_timeout`] until a job arrives or the
/// timeout elapses. Once closed, the queue rejects new jobs but still hands
/// out the ones already queued so shutdown never drops accepted work.
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    /// Create a new, open, empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                next_id: 0,
                closed: false,
                stats: QueueStats::default(),
            }),
            available: Condvar::new(),
        }
    }

    /// Submit a task
    ///
    /// Returns the job id, or [`JobError::QueueClosed`] once the queue has
    /// been closed.
    pub(crate) fn push(&self, task: Task) -> Result<JobId, JobError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(JobError::QueueClosed);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.jobs.push_back(Job { id, task });
        state.stats.jobs_submitted += 1;
        state.stats.queue_size = state.jobs.len();
        drop(state);

        tracing::trace!(job_id = id, "job queued");
        self.available.notify_one();
        Ok(id)
    }

    /// Take the next job, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` on timeout, or immediately if the queue is closed and
    /// empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let mut state = self.state.lock();
        if state.jobs.is_empty() && !state.closed {
            self.available.wait_for(&mut state, timeout);
        }

        let job = state.jobs.pop_front();
        state.stats.queue_size = state.jobs.len();
        job
    }

    /// Mark a job as completed
    pub fn complete_job(&self, job_id: JobId) {
        let mut state = self.state.lock();
        state.stats.jobs_completed += 1;
        drop(state);

        tracing::trace!(job_id, "job completed");
    }

    /// Close the queue
    ///
    /// New submissions fail; queued jobs remain available. Wakes every
    /// waiting worker.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Check if the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Get the number of queued jobs
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
