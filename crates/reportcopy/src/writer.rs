//! Producer side of a transfer: scan the source tree into the session queue

use crate::queue::{FileEntryQueue, Statistic};
use crate::registry::{QueueRegistry, SessionKey};
use crate::scanner::{DirScanner, FileVisitor};
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Appends every visited file to a queue
pub(crate) struct QueueVisitor<'a> {
    pub(crate) queue: &'a FileEntryQueue,
}

impl FileVisitor for QueueVisitor<'_> {
    fn visit(&self, path: &Path, relative_path: &Path, size: u64) -> io::Result<()> {
        self.queue
            .add(path.to_path_buf(), relative_path.to_path_buf(), size);
        Ok(())
    }
}

/// Runs a scanner on the node that owns the files and feeds the queue of
/// one session
pub struct DirScanningQueueWriter {
    key: SessionKey,
}

impl DirScanningQueueWriter {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    /// Scan `root` into the session queue
    ///
    /// On success the queue is shut down gracefully so workers drain what
    /// was found. On failure pending entries are dropped and the queue is
    /// shut down before the error is returned.
    pub fn invoke(
        &self,
        registry: &QueueRegistry,
        root: &Path,
        scanner: &dyn DirScanner,
    ) -> io::Result<Statistic> {
        let queue = registry.get_or_create(self.key);
        let visitor = QueueVisitor { queue: &queue };

        if let Err(e) = scanner.scan(root, &visitor) {
            warn!(key = %self.key, root = %root.display(), error = %e, "Scan failed, stopping workers");
            queue.shutdown_now();
            return Err(e);
        }

        queue.shutdown();

        let statistic = queue.statistic();
        debug!(
            key = %self.key,
            files = statistic.overall_count,
            bytes = statistic.overall_size,
            "Scan finished"
        );
        Ok(statistic)
    }
}
