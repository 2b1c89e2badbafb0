// crates/downloader/src/queue.rs
//! FIFO of pending jobs shared between the owner and the worker
//!
//! The lock guards the deque's shape only. The worker copies the front job out
//! while holding the lock and pops it by id when done, so jobs it works on are
//! never borrowed across an unlock.

use crate::job::{FetchJob, JobId};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Summary of a queued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: JobId,
    pub title: String,
    pub subresources: usize,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<FetchJob>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FetchJob>> {
        // a panicking holder can't leave the deque half-modified
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the deque locked
    ///
    /// For compound operations that must be atomic with respect to the worker.
    pub fn with_jobs<R>(&self, f: impl FnOnce(&mut VecDeque<FetchJob>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn push(&self, job: FetchJob) -> JobId {
        let id = job.id;
        self.lock().push_back(job);
        id
    }

    /// Copy of the front job
    pub fn front_snapshot(&self) -> Option<FetchJob> {
        self.lock().front().cloned()
    }

    /// Pops the front job if it is still `id`
    pub fn pop_front_if(&self, id: JobId) -> bool {
        let mut jobs = self.lock();
        if jobs.front().is_some_and(|job| job.id == id) {
            jobs.pop_front();
            true
        } else {
            false
        }
    }

    /// Removes the job at `index`, returning its id
    pub fn remove(&self, index: usize) -> Option<JobId> {
        self.lock().remove(index).map(|job| job.id)
    }

    /// Removes every job and returns how many there were
    pub fn clear(&self) -> usize {
        let mut jobs = self.lock();
        let count = jobs.len();
        jobs.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.lock()
            .iter()
            .map(|job| QueueEntry {
                id: job.id,
                title: job.title.clone(),
                subresources: job.subresources.len(),
            })
            .collect()
    }
}
