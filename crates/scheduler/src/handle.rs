//! Completion handles for background jobs
//!
//! A [`JobHandle`] is the receiving side of a job's outcome. Handles are cheap
//! to clone and every clone observes the same outcome, so a caller can keep
//! one while a [`PendingJobs`] set keeps another for a later drain.

use crate::JobError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a job: the closure's return value, or a job-system error.
pub type JobOutcome<T> = Result<T, JobError>;

struct Completion<T> {
    outcome: Mutex<Option<JobOutcome<T>>>,
    done: Condvar,
}

/// Handle to a job's eventual outcome
///
/// # Example
///
/// ```
/// use mvs_scheduler::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(1)).unwrap();
/// let handle = pool.spawn(|| 6 * 7).unwrap();
///
/// assert_eq!(handle.wait(), Ok(42));
/// assert!(handle.is_finished());
///
/// pool.shutdown();
/// ```
pub struct JobHandle<T> {
    inner: Arc<Completion<T>>,
}

impl<T> Clone for JobHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> JobHandle<T> {
    /// Create a connected handle and completer pair
    pub(crate) fn pair() -> (Self, Completer<T>) {
        let inner = Arc::new(Completion {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        });
        let completer = Completer {
            inner: Some(inner.clone()),
        };
        (Self { inner }, completer)
    }

    /// Check if the job has finished (successfully or not)
    pub fn is_finished(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }
}

impl<T: Clone> JobHandle<T> {
    /// Block until the job finishes and return its outcome
    pub fn wait(&self) -> JobOutcome<T> {
        let mut outcome = self.inner.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.inner.done.wait(&mut outcome);
        }
    }

    /// Block for at most `timeout`, returning `None` if the job is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome<T>> {
        let mut outcome = self.inner.outcome.lock();
        if outcome.is_none() {
            self.inner.done.wait_for(&mut outcome, timeout);
        }
        outcome.clone()
    }

    /// Return the outcome if the job has finished, without blocking
    pub fn try_result(&self) -> Option<JobOutcome<T>> {
        self.inner.outcome.lock().clone()
    }
}

/// Sending side of a [`JobHandle`]
///
/// Dropping a completer without calling [`Completer::complete`] resolves the
/// handle with [`JobError::Dropped`], so waiters never hang on a job that
/// was discarded.
pub(crate) struct Completer<T> {
    inner: Option<Arc<Completion<T>>>,
}

impl<T> Completer<T> {
    /// Publish the outcome and wake every waiter
    pub(crate) fn complete(mut self, outcome: JobOutcome<T>) {
        if let Some(inner) = self.inner.take() {
            Self::publish(&inner, outcome);
        }
    }

    fn publish(inner: &Completion<T>, outcome: JobOutcome<T>) {
        *inner.outcome.lock() = Some(outcome);
        inner.done.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            Self::publish(&inner, Err(JobError::Dropped));
        }
    }
}

/// Unordered set of outstanding job handles
///
/// Supports concurrent insertion from any thread. [`PendingJobs::drain`]
/// blocks until every registered job has finished, including jobs registered
/// while the drain is in progress.
pub struct PendingJobs<T> {
    handles: Mutex<Vec<JobHandle<T>>>,
}

impl<T: Clone> PendingJobs<T> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a handle
    pub fn push(&self, handle: JobHandle<T>) {
        self.handles.lock().push(handle);
    }

    /// Get the number of registered handles (finished or not)
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Check if no handles are registered
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Get the number of registered handles whose job has not finished
    pub fn in_flight(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Remove finished handles whose outcome matches `discard`
    ///
    /// Returns the number of handles removed. Unfinished handles are always
    /// kept.
    pub fn prune<F>(&self, mut discard: F) -> usize
    where
        F: FnMut(&JobOutcome<T>) -> bool,
    {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|handle| match handle.try_result() {
            Some(outcome) => !discard(&outcome),
            None => true,
        });
        before - handles.len()
    }

    /// Wait for every registered job and return their outcomes
    ///
    /// The set is empty afterwards.
    pub fn drain(&self) -> Vec<JobOutcome<T>> {
        let mut outcomes = Vec::new();
        loop {
            let batch = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                return outcomes;
            }
            outcomes.extend(batch.iter().map(JobHandle::wait));
        }
    }
}

impl<T: Clone> Default for PendingJobs<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_handle_receives_outcome() {
        let (handle, completer) = JobHandle::pair();
        assert!(!handle.is_finished());
        assert_eq!(handle.try_result(), None);

        completer.complete(Ok(7));

        assert!(handle.is_finished());
        assert_eq!(handle.wait(), Ok(7));
        assert_eq!(handle.try_result(), Some(Ok(7)));
    }

    #[test]
    fn test_clones_observe_same_outcome() {
        let (handle, completer) = JobHandle::pair();
        let other = handle.clone();

        completer.complete(Ok("done".to_string()));

        assert_eq!(handle.wait(), Ok("done".to_string()));
        assert_eq!(other.wait(), Ok("done".to_string()));
    }

    #[test]
    fn test_dropped_completer_resolves_handle() {
        let (handle, completer) = JobHandle::<u32>::pair();
        drop(completer);
        assert_eq!(handle.wait(), Err(JobError::Dropped));
    }

    #[test]
    fn test_wait_blocks_until_completion() {
        let (handle, completer) = JobHandle::pair();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(1u8));
        });

        assert_eq!(handle.wait(), Ok(1));
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_on_running_job() {
        let (handle, _completer) = JobHandle::<u8>::pair();
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_pending_drain_collects_all_outcomes() {
        let pending = PendingJobs::new();
        let mut completers = Vec::new();

        for _ in 0..3 {
            let (handle, completer) = JobHandle::pair();
            pending.push(handle);
            completers.push(completer);
        }
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.in_flight(), 3);

        let producer = thread::spawn(move || {
            for (i, completer) in completers.into_iter().enumerate() {
                completer.complete(Ok(i));
            }
        });

        let mut outcomes = pending.drain();
        producer.join().unwrap();

        outcomes.sort_by_key(|outcome| *outcome.as_ref().unwrap());
        assert_eq!(outcomes, vec![Ok(0), Ok(1), Ok(2)]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_prune_keeps_unfinished_and_failed() {
        let pending = PendingJobs::new();

        let (ok_handle, ok_completer) = JobHandle::pair();
        let (err_handle, err_completer) = JobHandle::pair();
        let (running_handle, _running_completer) = JobHandle::<Result<(), String>>::pair();
        pending.push(ok_handle);
        pending.push(err_handle);
        pending.push(running_handle);

        ok_completer.complete(Ok(Ok(())));
        err_completer.complete(Ok(Err("boom".to_string())));

        let removed = pending.prune(|outcome| matches!(outcome, Ok(Ok(()))));
        assert_eq!(removed, 1);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.in_flight(), 1);
    }
}
