// crates/downloader/src/sink.rs
//! Destination for fetched sub-resources

use crate::error::SinkError;
use crate::job::FetchJob;
use crate::progress::JobStatus;

/// Stores fetched data; called only from the worker thread
pub trait Sink: Send {
    /// Stores sub-resource `index` of `job`
    fn write(&mut self, job: &FetchJob, index: usize, bytes: &[u8]) -> Result<(), SinkError>;

    /// Called once per job that ran to an end, successful or not
    ///
    /// Not called for jobs interrupted by a stop request, which stay queued.
    fn finalize_job(&mut self, job: &FetchJob, status: JobStatus) -> Result<(), SinkError>;
}
