// crates/downloader/src/lib.rs
//! Background download queue
//!
//! A [`DownloadCoordinator`] owns a FIFO of [`FetchJob`]s and one worker
//! thread that fetches each job's sub-resources in order and hands them to a
//! [`Sink`]. The owner can stop the worker, skip the job in progress or
//! edit the queue at any time; progress is read from lock-free snapshots.
//!
//! # Example
//!
//! ```rust,no_run
//! use panelview_config::Config;
//! use panelview_downloader::{DownloadCoordinator, FetchJob, JobStatus, Sink, SinkError, SubResource};
//!
//! struct Discard;
//!
//! impl Sink for Discard {
//!     fn write(&mut self, _job: &FetchJob, _index: usize, bytes: &[u8]) -> Result<(), SinkError> {
//!         println!("{} bytes", bytes.len());
//!         Ok(())
//!     }
//!
//!     fn finalize_job(&mut self, _job: &FetchJob, _status: JobStatus) -> Result<(), SinkError> {
//!         Ok(())
//!     }
//! }
//!
//! let coordinator = DownloadCoordinator::from_config(&Config::default(), Box::new(Discard));
//! let page = SubResource::parse("p01.jpg", "ftp://example.org/comics/p01.jpg").unwrap();
//! coordinator.enqueue("Volume 1", vec![page]);
//! coordinator.finish();
//! ```

mod control;
mod coordinator;
mod error;
mod fetcher;
mod job;
mod progress;
mod queue;
mod sink;
mod source;

pub use control::{ControlFlag, RunState};
pub use coordinator::{DownloadCoordinator, DownloadEvent, EVENT_CAPACITY, MAX_REPORTS};
pub use error::{DownloadError, DownloadResult, SinkError};
pub use fetcher::{session_options, Fetcher, FtpFetcher};
pub use job::{FetchJob, JobId, SubResource};
pub use progress::{JobReport, JobStatus, ProgressCursor, ProgressSnapshot, SubResourceFailure};
pub use queue::{JobQueue, QueueEntry};
pub use sink::Sink;
pub use source::{resolve_job, ManifestSource, Source};
