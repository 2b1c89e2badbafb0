// crates/downloader/src/job.rs
//! Fetch jobs and their sub-resources

use crate::error::{DownloadError, DownloadResult};
use panelview_network::Locator;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        JobId(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One individually fetchable item of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResource {
    pub name: String,
    pub locator: Locator,
}

impl SubResource {
    pub fn new(name: impl Into<String>, locator: Locator) -> Self {
        Self {
            name: name.into(),
            locator,
        }
    }

    /// Parses `url` into a sub-resource
    pub fn parse(name: impl Into<String>, url: &str) -> DownloadResult<Self> {
        let locator = Locator::parse(url).map_err(DownloadError::Locator)?;
        Ok(Self::new(name, locator))
    }
}

/// A titled, ordered list of sub-resources fetched one after another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub id: JobId,
    pub title: String,
    pub subresources: Vec<SubResource>,
}

impl FetchJob {
    pub fn new(title: impl Into<String>, subresources: Vec<SubResource>) -> Self {
        Self {
            id: JobId::next(),
            title: title.into(),
            subresources,
        }
    }

    pub fn len(&self) -> usize {
        self.subresources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subresources.is_empty()
    }
}
