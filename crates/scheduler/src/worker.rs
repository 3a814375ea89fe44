//! Worker pool for background job execution.
//!
//! This module provides a fixed pool of worker threads that execute jobs
//! from a shared FIFO [`JobQueue`]. Each submitted closure gets a
//! [`JobHandle`] through which its return value (or panic) is reported.

use crate::handle::{JobHandle, JobOutcome};
use crate::queue::JobQueue;
use crate::{JobError, QueueStats};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time a worker will wait for a job before checking shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration.
    ///
    /// A worker count of zero is raised to one.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(100),
            thread_name: "mvs-worker".to_string(),
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Worker pool for parallel job execution.
///
/// Jobs are closures submitted through [`WorkerPool::spawn`]. A panicking
/// job does not take its worker down; the panic is reported through the
/// job's handle as [`JobError::Panicked`].
///
/// Shutting down (explicitly or by dropping the pool) closes the queue, lets
/// workers finish every job that was already accepted, and joins the
/// threads.
///
/// # Example
///
/// ```
/// use mvs_scheduler::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(2)).unwrap();
///
/// let handles: Vec<_> = (0..4)
///     .map(|i| pool.spawn(move || i * 2).unwrap())
///     .collect();
///
/// let results: Vec<_> = handles.iter().map(|h| h.wait().unwrap()).collect();
/// assert_eq!(results, vec![0, 2, 4, 6]);
///
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Create and start a new worker pool.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, JobError> {
        let queue = Arc::new(JobQueue::new());
        let mut pool = Self {
            queue: queue.clone(),
            workers: Vec::with_capacity(config.num_workers),
        };

        for id in 0..config.num_workers {
            let worker = Worker::new(
                format!("{}-{}", config.thread_name, id),
                queue.clone(),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }

        tracing::debug!(workers = config.num_workers, "worker pool started");
        Ok(pool)
    }

    /// Submit a closure for execution on a worker thread.
    ///
    /// Returns a handle to the closure's result, or
    /// [`JobError::QueueClosed`] if the pool is shutting down.
    pub fn spawn<F, T>(&self, job: F) -> Result<JobHandle<T>, JobError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (handle, completer) = JobHandle::pair();

        self.queue.push(Box::new(move || {
            let outcome: JobOutcome<T> = panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| JobError::Panicked(panic_message(payload.as_ref())));
            completer.complete(outcome);
        }))?;

        Ok(handle)
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Get statistics for the underlying queue.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Shutdown the worker pool gracefully.
    ///
    /// Blocks until every accepted job has run and all workers have exited.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.queue.close();

        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Create and start a new worker thread.
    fn new(name: String, queue: Arc<JobQueue>, poll_interval: Duration) -> Result<Self, JobError> {
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(queue, poll_interval))
            .map_err(|e| JobError::Spawn(e.to_string()))?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    /// Main worker loop.
    ///
    /// Pulls jobs until the queue is closed and empty.
    fn run(queue: Arc<JobQueue>, poll_interval: Duration) {
        loop {
            match queue.pop_timeout(poll_interval) {
                Some(job) => {
                    let job_id = job.id;
                    job.run();
                    queue.complete_job(job_id);
                }
                None => {
                    if queue.is_closed() && queue.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    /// Wait for the worker thread to finish.
    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Get the number of logical CPU cores.
///
/// This is used as the default number of worker threads.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
