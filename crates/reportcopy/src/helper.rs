//! Multithreaded copy of a source tree through a session queue
//!
//! The helper coordinates one transfer:
//! - opening a session queue on the source node
//! - starting N copy workers that drain the queue
//! - running the scan that fills the queue
//! - collecting worker results, each bounded by a timeout
//! - removing the queue, no matter how the transfer ended
//!
//! ```text
//!   controller                              source node
//!   ┌──────────────────────┐                ┌──────────────────────────┐
//!   │ MultithreadedFile-   │ scan_into_queue│ DirScanningQueueWriter   │
//!   │ CopyHelper           │───────────────▶│   walk ─▶ FileEntryQueue │
//!   │                      │                │              │           │
//!   │ worker 1 ◀───────────┼── files ───────┼── QueueReadingDirScanner │
//!   │ worker N ◀───────────┼── files ───────┼── QueueReadingDirScanner │
//!   │                      │ shutdown_and_  │                          │
//!   │ (always) ────────────┼─ remove ──────▶│ QueueShutdownAndRemover  │
//!   └──────────────────────┘                └──────────────────────────┘
//! ```

use crate::error::{NodeError, Result, TransferError};
use crate::node::{self, SourceNode};
use crate::pool::{TaskHandle, WaitError, WorkerPool};
use crate::queue::Statistic;
use crate::registry::SessionKey;
use crate::scanner::ScanPattern;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What to copy where
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source_dir: PathBuf,
    pub pattern: ScanPattern,
    pub target_dir: PathBuf,
    /// Values below one are treated as one
    pub number_of_workers: usize,
    /// Budget for each worker's result, waited for one worker at a time
    pub timeout: Duration,
}

type WorkerHandle = TaskHandle<io::Result<u64>>;

pub struct MultithreadedFileCopyHelper {
    node: Arc<dyn SourceNode>,
}

impl MultithreadedFileCopyHelper {
    pub fn new(node: Arc<dyn SourceNode>) -> Self {
        Self { node }
    }

    /// Copy the files matching `request.pattern` into the target directory
    ///
    /// Returns the number of files transferred by all workers together.
    pub fn copy_recursive_to(&self, request: &CopyRequest, pool: &WorkerPool) -> Result<u64> {
        // Bad patterns fail before anything touches the node
        request.pattern.compile()?;

        let key = SessionKey::new();
        let started = Instant::now();
        info!(
            key = %key,
            source = %request.source_dir.display(),
            target = %request.target_dir.display(),
            workers = request.number_of_workers.max(1),
            "Starting transfer"
        );

        let mut workers = Vec::new();
        let outcome = self.transfer(key, request, pool, &mut workers);

        let cancelled = cancel_outstanding(&workers);
        if cancelled > 0 {
            debug!(key = %key, cancelled, "Cancelled outstanding workers");
        }
        let cleanup = node::shutdown_and_remove(self.node.as_ref(), key);

        match (outcome, cleanup) {
            (Ok((files, statistic)), Ok(_)) => {
                log_throughput(key, files, statistic, started.elapsed());
                Ok(files)
            }
            (Ok(_), Err(source)) => Err(TransferError::Cleanup { key, source }),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!(key = %key, error = %cleanup, "Failed to release queue after earlier failure");
                Err(e)
            }
        }
    }

    fn transfer(
        &self,
        key: SessionKey,
        request: &CopyRequest,
        pool: &WorkerPool,
        workers: &mut Vec<WorkerHandle>,
    ) -> Result<(u64, Statistic)> {
        node::open_queue(self.node.as_ref(), key)?;

        for _ in 0..request.number_of_workers.max(1) {
            workers.push(self.spawn_worker(key, &request.target_dir, pool));
        }

        let statistic = node::scan_into_queue(
            self.node.as_ref(),
            key,
            &request.source_dir,
            &request.pattern,
        )
        .map_err(|e| scan_failure(&request.source_dir, e))?;

        let mut transferred = 0u64;
        for (worker, handle) in workers.iter().enumerate() {
            match handle.wait(request.timeout) {
                Ok(Ok(files)) => {
                    debug!(key = %key, worker, files, "Worker finished");
                    transferred += files;
                }
                Ok(Err(source)) => {
                    return Err(TransferError::Copy {
                        target: request.target_dir.clone(),
                        source,
                    })
                }
                Err(WaitError::Timeout) => {
                    let cancelled = cancel_outstanding(workers);
                    warn!(key = %key, worker, cancelled, "Worker timed out");
                    return Err(TransferError::WorkerTimeout {
                        worker,
                        timeout: request.timeout,
                        cancelled,
                    });
                }
                Err(WaitError::Cancelled) | Err(WaitError::Lost) => {
                    return Err(TransferError::WorkerLost { worker })
                }
            }
        }

        Ok((transferred, statistic))
    }

    fn spawn_worker(&self, key: SessionKey, target_dir: &Path, pool: &WorkerPool) -> WorkerHandle {
        let node = Arc::clone(&self.node);
        let target_dir = target_dir.to_path_buf();
        pool.submit(move |cancelled| node.copy_queue_to(key, &target_dir, cancelled))
    }
}

fn scan_failure(root: &Path, error: NodeError) -> TransferError {
    match error {
        NodeError::Remote(message) => TransferError::Scan {
            root: root.to_path_buf(),
            source: io::Error::other(message),
        },
        other => TransferError::Node(other),
    }
}

fn cancel_outstanding(workers: &[WorkerHandle]) -> usize {
    workers
        .iter()
        .filter(|w| !w.is_cancelled())
        .map(|w| w.cancel())
        .filter(|&cancelled| cancelled)
        .count()
}

fn log_throughput(key: SessionKey, files: u64, statistic: Statistic, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        key = %key,
        files,
        scanned = statistic.overall_count,
        bytes = statistic.overall_size,
        elapsed_ms = elapsed.as_millis() as u64,
        files_per_sec = (files as f64 / secs) as u64,
        bytes_per_sec = (statistic.overall_size as f64 / secs) as u64,
        "Transfer complete"
    );
}
