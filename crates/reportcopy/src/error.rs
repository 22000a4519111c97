//! Error types for reportcopy
//!
//! The scanning and copying layers speak `std::io::Result`, the same way a
//! directory walk or a file copy does. The orchestrator maps those into the
//! categories below so callers can tell "too slow" from "broken":
//! - `Scan` and `Copy` are I/O failures on either side of the queue
//! - `WorkerTimeout` means a worker missed its deadline and was cancelled
//! - `Cleanup` only surfaces when nothing failed before it

use crate::registry::SessionKey;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TransferError>;

/// Failure of one transfer operation
#[derive(Error, Debug)]
pub enum TransferError {
    /// The producer failed while walking the source tree
    #[error("failed to scan {root}: {source}")]
    Scan {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker failed to copy an entry into the target directory
    #[error("failed to copy into {target}: {source}")]
    Copy {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker did not report back within its budget
    #[error("worker {worker} did not finish within {timeout:?} ({cancelled} worker(s) cancelled)")]
    WorkerTimeout {
        worker: usize,
        timeout: Duration,
        cancelled: usize,
    },

    /// A worker thread went away without reporting a result (it panicked)
    #[error("worker {worker} terminated without reporting a result")]
    WorkerLost { worker: usize },

    /// Releasing the session queue failed and nothing else had failed before
    #[error("failed to release queue {key}: {source}")]
    Cleanup {
        key: SessionKey,
        #[source]
        source: NodeError,
    },

    /// Include or exclude pattern did not compile
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Talking to the source node failed
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// The worker threads could not be started
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl TransferError {
    /// Returns true for the timeout category
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::WorkerTimeout { .. })
    }

    /// Returns true for scan and copy failures, which callers treat alike
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            TransferError::Scan { .. } | TransferError::Copy { .. } | TransferError::WorkerLost { .. }
        )
    }
}

/// Errors crossing the boundary to a source node
#[derive(Error, Debug)]
pub enum NodeError {
    /// The node agent is gone (its thread exited or the channel closed)
    #[error("source node disconnected")]
    Disconnected,

    /// A task or reply could not be encoded or decoded
    #[error("malformed node message: {0}")]
    Codec(#[from] serde_json::Error),

    /// The node executed the task and reported a failure
    #[error("{0}")]
    Remote(String),

    /// The node answered with a message that does not belong to the task
    #[error("unexpected reply to {task}: {reply}")]
    UnexpectedReply { task: &'static str, reply: String },
}

impl NodeError {
    /// Converts a node failure into an I/O error for the scanner layer
    pub fn into_io(self) -> std::io::Error {
        match self {
            NodeError::Disconnected => std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "source node disconnected",
            ),
            other => std::io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let scan = TransferError::Scan {
            root: PathBuf::from("/src"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(scan.is_io_failure());
        assert!(!scan.is_timeout());

        let timeout = TransferError::WorkerTimeout {
            worker: 0,
            timeout: Duration::from_secs(1),
            cancelled: 1,
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_io_failure());
    }

    #[test]
    fn test_display_includes_paths() {
        let err = TransferError::Copy {
            target: PathBuf::from("/reports/html"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/reports/html"));
    }

    #[test]
    fn test_node_error_into_io() {
        let io = NodeError::Disconnected.into_io();
        assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);

        let io = NodeError::Remote("disk full".to_string()).into_io();
        assert!(io.to_string().contains("disk full"));
    }
}
