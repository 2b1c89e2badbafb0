// crates/downloader/src/coordinator.rs
//! Background download worker
//!
//! One worker thread per coordinator does all network I/O. The owner only
//! enqueues, flips the control flag and reads progress, none of which block
//! on the network.
//!
//! The flag is checked before every sub-resource and by the transfer itself,
//! so a stop or skip takes effect within one read timeout.

use crate::control::{ControlFlag, RunState};
use crate::error::{DownloadError, DownloadResult};
use crate::fetcher::{Fetcher, FtpFetcher};
use crate::job::{FetchJob, JobId, SubResource};
use crate::progress::{JobReport, JobStatus, ProgressCursor, ProgressSnapshot};
use crate::queue::{JobQueue, QueueEntry};
use crate::sink::Sink;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use panelview_config::{Config, DownloadConfig};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between retries
const RETRY_SLICE: Duration = Duration::from_millis(10);

/// Events held for a reader that hasn't caught up; newer ones are dropped
pub const EVENT_CAPACITY: usize = 256;

/// Finished job reports kept; the oldest are discarded first
pub const MAX_REPORTS: usize = 64;

/// Notifications sent by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    JobStarted {
        id: JobId,
        title: String,
        subresources: usize,
    },
    /// Sub-resource `index` was fetched and stored
    Progress {
        id: JobId,
        index: usize,
        total: usize,
        bytes: usize,
    },
    SubresourceFailed {
        id: JobId,
        index: usize,
        message: String,
    },
    JobFinished(JobReport),
    /// The worker exited; `interrupted` is false when the queue ran empty
    QueueFinished { interrupted: bool },
}

/// State shared between the owner and the worker
struct Shared {
    queue: JobQueue,
    control: ControlFlag,
    progress: ProgressCursor,
    reports: Mutex<VecDeque<JobReport>>,
    events: Sender<DownloadEvent>,
    retries: u32,
    retry_delay: Duration,
    reuse_connections: bool,
}

impl Shared {
    fn emit(&self, event: DownloadEvent) {
        // the coordinator owns the receiver for as long as the worker runs
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::trace!("Event queue full, dropped {:?}", event);
        }
    }

    fn publish(&self, report: JobReport) {
        {
            let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
            if reports.len() == MAX_REPORTS {
                reports.pop_front();
            }
            reports.push_back(report.clone());
        }
        self.emit(DownloadEvent::JobFinished(report));
    }
}

/// Owned by whichever worker thread is alive
struct WorkerParts {
    fetcher: Box<dyn Fetcher>,
    sink: Box<dyn Sink>,
}

/// Queue of fetch jobs processed by a background thread
pub struct DownloadCoordinator {
    shared: Arc<Shared>,
    parts: Arc<Mutex<WorkerParts>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    events: Receiver<DownloadEvent>,
}

impl DownloadCoordinator {
    pub fn new(fetcher: Box<dyn Fetcher>, sink: Box<dyn Sink>, config: &DownloadConfig) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        let shared = Shared {
            queue: JobQueue::new(),
            control: ControlFlag::default(),
            progress: ProgressCursor::new(),
            reports: Mutex::new(VecDeque::with_capacity(MAX_REPORTS)),
            events: events_tx,
            retries: config.transfer_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            reuse_connections: config.reuse_connections,
        };

        Self {
            shared: Arc::new(shared),
            parts: Arc::new(Mutex::new(WorkerParts { fetcher, sink })),
            handle: Mutex::new(None),
            events: events_rx,
        }
    }

    /// Coordinator fetching over FTP with the configured session settings
    pub fn from_config(config: &Config, sink: Box<dyn Sink>) -> Self {
        let fetcher = FtpFetcher::from_config(config);
        Self::new(Box::new(fetcher), sink, &config.download)
    }

    /// Queues a job and starts the worker if it is idle
    pub fn enqueue(&self, title: impl Into<String>, subresources: Vec<SubResource>) -> JobId {
        self.enqueue_job(FetchJob::new(title, subresources))
    }

    pub fn enqueue_job(&self, job: FetchJob) -> JobId {
        log::info!("Queued {} '{}' ({} items)", job.id, job.title, job.len());
        let id = self.shared.queue.push(job);
        if let Err(e) = self.start() {
            log::error!("{}", e);
        }
        id
    }

    /// Starts a worker if the queue has jobs and none is running
    ///
    /// Returns true if a new worker was spawned.
    pub fn start(&self) -> DownloadResult<bool> {
        if self.shared.queue.is_empty() || !self.shared.control.start() {
            return Ok(false);
        }

        let mut handle = self.lock_handle();
        let previous = handle.take();
        let shared = Arc::clone(&self.shared);
        let parts = Arc::clone(&self.parts);

        let spawned = thread::Builder::new()
            .name("panelview-download".to_string())
            .spawn(move || {
                if let Some(previous) = previous {
                    if previous.join().is_err() {
                        log::error!("Download worker panicked");
                    }
                }
                let mut parts = parts.lock().unwrap_or_else(PoisonError::into_inner);
                run_worker(&shared, &mut parts);
            });

        match spawned {
            Ok(worker) => {
                *handle = Some(worker);
                Ok(true)
            }
            Err(e) => {
                self.shared.control.stop();
                Err(DownloadError::WorkerSpawn(e.to_string()))
            }
        }
    }

    /// Stops the worker at the next check and waits for it
    ///
    /// The job being processed stays at the front of the queue.
    pub fn interrupt(&self) {
        self.shared.control.stop();
        self.join();
    }

    /// Waits for the worker to drain the queue
    pub fn finish(&self) {
        self.join();
    }

    /// Abandons the rest of the current job; false if nothing is running
    pub fn skip_current(&self) -> bool {
        let shared = &self.shared;
        let skipped = shared.queue.with_jobs(|jobs| !jobs.is_empty() && shared.control.skip());
        if skipped {
            log::info!("Skipping current job");
        }
        skipped
    }

    /// Removes the queued job at `index`
    ///
    /// Index 0 while the worker runs is the job in progress, which is skipped
    /// rather than pulled from under the worker.
    pub fn delete_entry(&self, index: usize) -> bool {
        let shared = &self.shared;
        shared.queue.with_jobs(|jobs| {
            if index >= jobs.len() {
                return false;
            }
            if index == 0 && shared.control.get() != RunState::Stop {
                shared.control.skip();
                return true;
            }
            jobs.remove(index).is_some()
        })
    }

    /// Interrupts the worker and drops every queued job
    pub fn clear_queue(&self) -> usize {
        self.interrupt();
        let removed = self.shared.queue.clear();
        log::info!("Cleared {} queued jobs", removed);
        removed
    }

    pub fn state(&self) -> RunState {
        self.shared.control.get()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.progress.snapshot()
    }

    pub fn queue(&self) -> Vec<QueueEntry> {
        self.shared.queue.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Reports of the last [`MAX_REPORTS`] finished jobs, oldest first
    pub fn reports(&self) -> Vec<JobReport> {
        self.shared
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Worker notifications; at most [`EVENT_CAPACITY`] wait unread
    pub fn events(&self) -> Receiver<DownloadEvent> {
        self.events.clone()
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self) {
        let handle = self.lock_handle().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Download worker panicked");
            }
        }
    }
}

impl Drop for DownloadCoordinator {
    fn drop(&mut self) {
        self.interrupt();
    }
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("state", &self.state())
            .field("queued", &self.queue_len())
            .finish()
    }
}

fn run_worker(shared: &Shared, parts: &mut WorkerParts) {
    log::debug!("Download worker started");

    let interrupted = loop {
        if shared.control.get() == RunState::Stop {
            break true;
        }

        // copy the job out; the deque may change once the lock is released
        let job = shared.queue.with_jobs(|jobs| match jobs.front() {
            Some(job) => Some(job.clone()),
            None => {
                shared.control.stop();
                None
            }
        });
        let Some(job) = job else {
            break false;
        };

        let mut report = process_job(shared, parts, &job);
        if report.status == JobStatus::Interrupted {
            log::info!("{} interrupted, left at the front of the queue", job.id);
            shared.progress.idle();
            shared.publish(report);
            break true;
        }

        if let Err(source) = parts.sink.finalize_job(&job, report.status) {
            let err = DownloadError::Sink {
                name: job.title.clone(),
                source,
            };
            log::warn!("{}", err);
            report.last_error = Some(err.to_string());
            if report.status == JobStatus::Completed {
                report.status = JobStatus::PartiallyFailed;
            }
        }

        // popping and clearing a pending skip are one step for skip_current
        shared.queue.with_jobs(|jobs| {
            if jobs.front().is_some_and(|front| front.id == job.id) {
                jobs.pop_front();
            }
            shared.control.resume();
        });
        shared.progress.finish_job();
        log::info!(
            "{} '{}' finished: {:?}, {}/{} items",
            job.id,
            job.title,
            report.status,
            report.completed,
            report.total
        );
        shared.publish(report);

        if !shared.reuse_connections {
            parts.fetcher.release();
        }
    };

    parts.fetcher.release();
    shared.progress.idle();
    shared.emit(DownloadEvent::QueueFinished { interrupted });
    log::debug!("Download worker exiting (interrupted: {})", interrupted);
}

fn process_job(shared: &Shared, parts: &mut WorkerParts, job: &FetchJob) -> JobReport {
    let mut report = JobReport::new(job);
    let total = job.len();
    shared.progress.begin_job(job);
    shared.emit(DownloadEvent::JobStarted {
        id: job.id,
        title: job.title.clone(),
        subresources: total,
    });

    for (index, sub) in job.subresources.iter().enumerate() {
        match shared.control.get() {
            RunState::Run => {}
            RunState::Skip => {
                report.status = JobStatus::Skipped;
                break;
            }
            RunState::Stop => {
                report.status = JobStatus::Interrupted;
                break;
            }
        }

        shared.progress.begin_subresource(index);
        match fetch_with_retry(shared, parts.fetcher.as_mut(), sub) {
            Ok(bytes) => {
                let stored = match parts.sink.write(job, index, &bytes) {
                    Ok(()) => true,
                    Err(source) => {
                        let err = DownloadError::Sink {
                            name: sub.name.clone(),
                            source,
                        };
                        record_failure(shared, &mut report, index, sub, &err);
                        false
                    }
                };
                shared.progress.finish_subresource(bytes.len(), stored);
                if stored {
                    report.completed += 1;
                    shared.emit(DownloadEvent::Progress {
                        id: job.id,
                        index,
                        total,
                        bytes: bytes.len(),
                    });
                }
            }
            Err(DownloadError::Interrupted) => {
                shared.progress.finish_subresource(0, false);
                match shared.control.get() {
                    RunState::Skip => {
                        report.status = JobStatus::Skipped;
                        break;
                    }
                    RunState::Stop => {
                        report.status = JobStatus::Interrupted;
                        break;
                    }
                    RunState::Run => {
                        record_failure(shared, &mut report, index, sub, &DownloadError::Interrupted);
                    }
                }
            }
            Err(err) if err.aborts_job() => {
                shared.progress.finish_subresource(0, false);
                record_failure(shared, &mut report, index, sub, &err);
                log::warn!(
                    "{} abandoned after item {} of {}",
                    job.id,
                    index + 1,
                    total
                );
                report.status = JobStatus::PartiallyFailed;
                break;
            }
            Err(err) => {
                shared.progress.finish_subresource(0, false);
                record_failure(shared, &mut report, index, sub, &err);
            }
        }
    }

    if report.status == JobStatus::Completed && !report.failures.is_empty() {
        report.status = JobStatus::PartiallyFailed;
    }
    report
}

fn record_failure(
    shared: &Shared,
    report: &mut JobReport,
    index: usize,
    sub: &SubResource,
    err: &DownloadError,
) {
    log::warn!("{} item {} ({}): {}", report.id, index + 1, sub.name, err);
    let message = err.to_string();
    report.record_failure(index, &sub.name, message.clone());
    shared.emit(DownloadEvent::SubresourceFailed {
        id: report.id,
        index,
        message,
    });
}

/// Fetches `sub`, retrying transient transfer failures
fn fetch_with_retry(
    shared: &Shared,
    fetcher: &mut dyn Fetcher,
    sub: &SubResource,
) -> DownloadResult<Vec<u8>> {
    let progress = &shared.progress;
    let control = &shared.control;
    let mut attempt = 0;

    loop {
        let result = fetcher.fetch(&sub.locator, &mut |received| {
            progress.update_transfer(received);
            control.is_running()
        });

        match result {
            Err(err) if err.is_retryable() && attempt < shared.retries => {
                attempt += 1;
                log::warn!(
                    "{}: {} (retry {}/{})",
                    sub.name,
                    err,
                    attempt,
                    shared.retries
                );
                if !pause(control, shared.retry_delay) {
                    return Err(DownloadError::Interrupted);
                }
            }
            other => return other,
        }
    }
}

/// Sleeps for `delay` unless the flag leaves run; false if it did
fn pause(control: &ControlFlag, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while control.is_running() {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(RETRY_SLICE));
    }
    false
}
