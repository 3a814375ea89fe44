//! Background job execution for the image cache.
//!
//! This crate provides a small fixed worker pool fed by a FIFO job queue.
//! Every submitted closure yields a [`JobHandle`] that reports its result,
//! and a [`PendingJobs`] set collects handles so that fire-and-forget work
//! can be joined at a well-defined drain point.
//!
//! # Example
//!
//! ```
//! use mvs_scheduler::{PendingJobs, WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(2)).unwrap();
//! let pending = PendingJobs::new();
//!
//! for i in 0..3 {
//!     pending.push(pool.spawn(move || i).unwrap());
//! }
//!
//! // Blocks until all three jobs have finished
//! let outcomes = pending.drain();
//! assert_eq!(outcomes.len(), 3);
//! assert!(outcomes.iter().all(|outcome| outcome.is_ok()));
//!
//! pool.shutdown();
//! ```

mod error;
mod handle;
mod queue;
mod worker;

// Re-export public API
pub use error::JobError;
pub use handle::{JobHandle, JobOutcome, PendingJobs};
pub use queue::{Job, JobId, JobQueue, QueueStats};
pub use worker::{WorkerPool, WorkerPoolConfig};
