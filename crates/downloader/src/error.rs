// crates/downloader/src/error.rs
//! Error types for the download queue

use panelview_network::NetworkError;
use thiserror::Error;

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Failure while storing a fetched sub-resource
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    /// One sub-resource couldn't be fetched; the connection is still good
    #[error("Failed to fetch {name}: {source}")]
    Transfer {
        name: String,
        #[source]
        source: NetworkError,
    },

    /// The server couldn't be reached or the control channel broke
    #[error("Connection to {host} failed: {source}")]
    Connection {
        host: String,
        #[source]
        source: NetworkError,
    },

    #[error("Failed to store {name}: {source}")]
    Sink {
        name: String,
        #[source]
        source: SinkError,
    },

    /// The document couldn't be turned into sub-resources
    #[error("Source error: {0}")]
    Source(String),

    #[error("Invalid locator: {0}")]
    Locator(#[source] NetworkError),

    #[error("Failed to spawn download worker: {0}")]
    WorkerSpawn(String),

    /// A stop or skip request cut the transfer short
    #[error("Interrupted")]
    Interrupted,
}

impl DownloadError {
    /// True if the rest of the job can't proceed after this error
    pub fn aborts_job(&self) -> bool {
        matches!(self, DownloadError::Connection { .. })
    }

    /// True if a later attempt at the same sub-resource might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Transfer { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_abort_job() {
        let connection = DownloadError::Connection {
            host: "example.org".to_string(),
            source: NetworkError::ConnectionClosed,
        };
        let transfer = DownloadError::Transfer {
            name: "p01.jpg".to_string(),
            source: NetworkError::Timeout,
        };
        assert!(connection.aborts_job());
        assert!(!transfer.aborts_job());
        assert!(!DownloadError::Interrupted.aborts_job());
        assert!(!DownloadError::Source("bad index".to_string()).aborts_job());
    }

    #[test]
    fn test_retryable() {
        let timeout = DownloadError::Transfer {
            name: "p01.jpg".to_string(),
            source: NetworkError::Timeout,
        };
        let missing = DownloadError::Transfer {
            name: "p01.jpg".to_string(),
            source: NetworkError::UnexpectedReply {
                context: "Failed to retrieve file".to_string(),
                code: 550,
                text: "No such file".to_string(),
            },
        };
        assert!(timeout.is_retryable());
        assert!(!missing.is_retryable());
        assert!(!DownloadError::Interrupted.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = DownloadError::Sink {
            name: "p02.jpg".to_string(),
            source: SinkError::Rejected("disk full".to_string()),
        };
        assert_eq!(err.to_string(), "Failed to store p02.jpg: Rejected: disk full");
    }
}
