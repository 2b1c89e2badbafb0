// crates/downloader/src/progress.rs
//! Download progress tracking
//!
//! The worker is the only writer. Each field is its own atomic, so readers
//! may see a slightly stale cursor but never a torn value.

use crate::job::{FetchJob, JobId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time copy of the worker's cursor
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Job being processed, if any
    pub job: Option<JobId>,
    /// Jobs finished since the coordinator was created
    pub jobs_finished: usize,
    /// Index of the sub-resource being fetched
    pub subresource: usize,
    /// Sub-resources in the current job
    pub subresource_total: usize,
    /// Sub-resources of the current job stored successfully
    pub items_completed: usize,
    /// Bytes received for the current sub-resource
    pub transfer_bytes: u64,
    /// Bytes received in the current job
    pub job_bytes: u64,
    /// Average rate over the current job
    pub bytes_per_second: f64,
}

impl ProgressSnapshot {
    /// Share of the current job's sub-resources already handled (0-100)
    pub fn percentage(&self) -> Option<f64> {
        self.job?;
        if self.subresource_total == 0 {
            return Some(100.0);
        }
        Some((self.subresource as f64 / self.subresource_total as f64 * 100.0).min(100.0))
    }

    /// Returns download speed in MB/s
    pub fn speed_mbps(&self) -> f64 {
        self.bytes_per_second / 1_000_000.0
    }
}

const NO_JOB: u64 = 0;

/// Cursor written by the worker, read by anyone
#[derive(Debug)]
pub struct ProgressCursor {
    epoch: Instant,
    job: AtomicU64,
    jobs_finished: AtomicUsize,
    subresource: AtomicUsize,
    subresource_total: AtomicUsize,
    items_completed: AtomicUsize,
    transfer_bytes: AtomicU64,
    job_bytes: AtomicU64,
    job_started_ms: AtomicU64,
}

impl Default for ProgressCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCursor {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            job: AtomicU64::new(NO_JOB),
            jobs_finished: AtomicUsize::new(0),
            subresource: AtomicUsize::new(0),
            subresource_total: AtomicUsize::new(0),
            items_completed: AtomicUsize::new(0),
            transfer_bytes: AtomicU64::new(0),
            job_bytes: AtomicU64::new(0),
            job_started_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn begin_job(&self, job: &FetchJob) {
        self.subresource.store(0, Ordering::Relaxed);
        self.subresource_total
            .store(job.subresources.len(), Ordering::Relaxed);
        self.items_completed.store(0, Ordering::Relaxed);
        self.transfer_bytes.store(0, Ordering::Relaxed);
        self.job_bytes.store(0, Ordering::Relaxed);
        self.job_started_ms.store(self.now_ms(), Ordering::Relaxed);
        self.job.store(job.id.get(), Ordering::Release);
    }

    pub(crate) fn begin_subresource(&self, index: usize) {
        self.transfer_bytes.store(0, Ordering::Relaxed);
        self.subresource.store(index, Ordering::Release);
    }

    /// Records the running byte count of the current transfer
    pub(crate) fn update_transfer(&self, received: usize) {
        self.transfer_bytes.store(received as u64, Ordering::Relaxed);
    }

    pub(crate) fn finish_subresource(&self, bytes: usize, stored: bool) {
        self.job_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.transfer_bytes.store(0, Ordering::Relaxed);
        if stored {
            self.items_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Moves the cursor past the current job
    pub(crate) fn finish_job(&self) {
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
        self.job.store(NO_JOB, Ordering::Release);
    }

    /// Leaves the current job without counting it
    pub(crate) fn idle(&self) {
        self.job.store(NO_JOB, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let job = self.job.load(Ordering::Acquire);
        let job_bytes = self.job_bytes.load(Ordering::Relaxed);
        let transfer_bytes = self.transfer_bytes.load(Ordering::Relaxed);

        let elapsed = Duration::from_millis(
            self.now_ms()
                .saturating_sub(self.job_started_ms.load(Ordering::Relaxed)),
        )
        .as_secs_f64();
        let bytes_per_second = if job != NO_JOB && elapsed > 0.0 {
            (job_bytes + transfer_bytes) as f64 / elapsed
        } else {
            0.0
        };

        ProgressSnapshot {
            job: (job != NO_JOB).then(|| JobId::from_raw(job)),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            subresource: self.subresource.load(Ordering::Acquire),
            subresource_total: self.subresource_total.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            transfer_bytes,
            job_bytes,
            bytes_per_second,
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Every sub-resource was fetched and stored
    Completed,
    /// Some sub-resources failed, or a connection failure cut the job short
    PartiallyFailed,
    /// Abandoned by a skip request
    Skipped,
    /// Abandoned by a stop request; the job stays queued
    Interrupted,
}

/// A sub-resource that couldn't be fetched or stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResourceFailure {
    pub index: usize,
    pub name: String,
    pub message: String,
}

/// Outcome of one pass over a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: JobId,
    pub title: String,
    pub status: JobStatus,
    /// Sub-resources stored successfully
    pub completed: usize,
    pub total: usize,
    pub failures: Vec<SubResourceFailure>,
    /// Most recent error, including ones that didn't belong to a sub-resource
    pub last_error: Option<String>,
}

impl JobReport {
    pub(crate) fn new(job: &FetchJob) -> Self {
        Self {
            id: job.id,
            title: job.title.clone(),
            status: JobStatus::Completed,
            completed: 0,
            total: job.subresources.len(),
            failures: Vec::new(),
            last_error: None,
        }
    }

    pub(crate) fn record_failure(&mut self, index: usize, name: &str, message: String) {
        self.last_error = Some(message.clone());
        self.failures.push(SubResourceFailure {
            index,
            name: name.to_string(),
            message,
        });
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SubResource;

    fn job(n: usize) -> FetchJob {
        let subs = (0..n)
            .map(|i| SubResource::parse(format!("p{}", i), "ftp://h/p.jpg").unwrap())
            .collect();
        FetchJob::new("Vol 1", subs)
    }

    #[test]
    fn test_idle_snapshot() {
        let cursor = ProgressCursor::new();
        let snapshot = cursor.snapshot();
        assert_eq!(snapshot.job, None);
        assert_eq!(snapshot.percentage(), None);
        assert_eq!(snapshot.bytes_per_second, 0.0);
    }

    #[test]
    fn test_cursor_advances() {
        let cursor = ProgressCursor::new();
        let job = job(4);
        cursor.begin_job(&job);
        assert_eq!(cursor.snapshot().job, Some(job.id));
        assert_eq!(cursor.snapshot().percentage(), Some(0.0));

        cursor.begin_subresource(0);
        cursor.update_transfer(500);
        assert_eq!(cursor.snapshot().transfer_bytes, 500);
        cursor.finish_subresource(1000, true);

        cursor.begin_subresource(1);
        cursor.finish_subresource(0, false);
        cursor.begin_subresource(2);

        let snapshot = cursor.snapshot();
        assert_eq!(snapshot.subresource, 2);
        assert_eq!(snapshot.subresource_total, 4);
        assert_eq!(snapshot.items_completed, 1);
        assert_eq!(snapshot.job_bytes, 1000);
        assert_eq!(snapshot.transfer_bytes, 0);
        assert_eq!(snapshot.percentage(), Some(50.0));
    }

    #[test]
    fn test_finish_job() {
        let cursor = ProgressCursor::new();
        cursor.begin_job(&job(1));
        cursor.finish_job();
        cursor.begin_job(&job(1));
        cursor.idle();

        let snapshot = cursor.snapshot();
        assert_eq!(snapshot.job, None);
        assert_eq!(snapshot.jobs_finished, 1);
    }

    #[test]
    fn test_speed_calculation() {
        let cursor = ProgressCursor::new();
        cursor.begin_job(&job(1));
        std::thread::sleep(Duration::from_millis(20));
        cursor.finish_subresource(1_000_000, true);

        let snapshot = cursor.snapshot();
        assert!(snapshot.bytes_per_second > 0.0);
        assert!(snapshot.speed_mbps() > 0.0);
    }

    #[test]
    fn test_empty_job_percentage() {
        let cursor = ProgressCursor::new();
        cursor.begin_job(&job(0));
        assert_eq!(cursor.snapshot().percentage(), Some(100.0));
    }

    #[test]
    fn test_report_failures() {
        let mut report = JobReport::new(&job(3));
        report.record_failure(1, "p1", "550 No such file".to_string());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.last_error.as_deref(), Some("550 No such file"));
        assert!(report.is_success());
        report.status = JobStatus::PartiallyFailed;
        assert!(!report.is_success());
    }
}
