//! Entry points used by the report publisher

use crate::copy::CopyVisitor;
use crate::error::{Result, TransferError};
use crate::fanout::MultithreadedDirScanner;
use crate::helper::{CopyRequest, MultithreadedFileCopyHelper};
use crate::node::{LocalNode, SourceNode};
use crate::pool::WorkerPool;
use crate::scanner::{DirScanner, FileVisitor, ScanPattern};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Copies report directories from one source node, reusing its worker pool
/// across calls
pub struct ReportCopier {
    helper: MultithreadedFileCopyHelper,
    pool: WorkerPool,
}

impl ReportCopier {
    pub fn new(node: Arc<dyn SourceNode>, threads: usize) -> Result<Self> {
        Ok(Self {
            helper: MultithreadedFileCopyHelper::new(node),
            pool: WorkerPool::new(threads)?,
        })
    }

    pub fn copy(&self, request: &CopyRequest) -> Result<u64> {
        self.helper.copy_recursive_to(request, &self.pool)
    }
}

/// Copy the files of `source` matching `include_pattern` into `destination`
///
/// With `worker_count == 0` the files are copied one by one on the calling
/// thread; otherwise `worker_count` workers share a scan of the source.
pub fn copy_report_directory(
    source: &Path,
    include_pattern: &str,
    destination: &Path,
    worker_count: usize,
    timeout_secs: u64,
) -> Result<u64> {
    let pattern = ScanPattern::new(include_pattern);

    if worker_count == 0 {
        return copy_sequential(source, &pattern, destination);
    }

    let copier = ReportCopier::new(Arc::new(LocalNode::new()), worker_count)?;
    copier.copy(&CopyRequest {
        source_dir: source.to_path_buf(),
        pattern,
        target_dir: destination.to_path_buf(),
        number_of_workers: worker_count,
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// Remembers whether a failure came from the copy rather than the walk
struct TrackedCopy {
    inner: CopyVisitor,
    failed: AtomicBool,
}

impl FileVisitor for TrackedCopy {
    fn visit(&self, path: &Path, relative_path: &Path, size: u64) -> io::Result<()> {
        self.inner
            .visit(path, relative_path, size)
            .inspect_err(|_| self.failed.store(true, Ordering::SeqCst))
    }
}

fn run_tracked(scanner: &dyn DirScanner, source: &Path, destination: &Path) -> Result<u64> {
    std::fs::create_dir_all(destination).map_err(|source| TransferError::Copy {
        target: destination.to_path_buf(),
        source,
    })?;

    let visitor = TrackedCopy {
        inner: CopyVisitor::new(destination.to_path_buf(), Arc::default()),
        failed: AtomicBool::new(false),
    };

    match scanner.scan(source, &visitor) {
        Ok(()) => Ok(visitor.inner.copied()),
        Err(e) if visitor.failed.load(Ordering::SeqCst) => Err(TransferError::Copy {
            target: destination.to_path_buf(),
            source: e,
        }),
        Err(e) => Err(TransferError::Scan {
            root: source.to_path_buf(),
            source: e,
        }),
    }
}

/// Single-threaded copy without a session queue
pub fn copy_sequential(source: &Path, pattern: &ScanPattern, destination: &Path) -> Result<u64> {
    let scanner = pattern.compile()?;
    let copied = run_tracked(&scanner, source, destination)?;
    info!(files = copied, source = %source.display(), "Copied sequentially");
    Ok(copied)
}

/// Local copy that walks once and spreads the copying over `workers`
/// threads, without sessions or a source node
pub fn copy_fanout(
    source: &Path,
    pattern: &ScanPattern,
    destination: &Path,
    workers: usize,
) -> Result<u64> {
    let scanner = MultithreadedDirScanner::new(pattern.compile()?, workers);
    let copied = run_tracked(&scanner, source, destination)?;
    info!(files = copied, workers, source = %source.display(), "Copied with fan-out");
    Ok(copied)
}
