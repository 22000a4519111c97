//! Consumer side of a transfer: a scanner whose files come out of a queue
//!
//! The copy mechanism takes any [`DirScanner`]. Handing it a
//! `QueueReadingDirScanner` instead of a directory walk lets several workers
//! share the output of a single walk.

use crate::registry::{QueueRegistry, SessionKey};
use crate::scanner::{DirScanner, FileVisitor};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct QueueReadingDirScanner {
    key: SessionKey,
    registry: Arc<QueueRegistry>,
    cancelled: Arc<AtomicBool>,
}

impl QueueReadingDirScanner {
    pub fn new(key: SessionKey, registry: Arc<QueueRegistry>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            key,
            registry,
            cancelled,
        }
    }
}

impl DirScanner for QueueReadingDirScanner {
    /// Feed queued entries to `visitor` until the end of the stream
    ///
    /// `root` is ignored, entries carry their own paths.
    fn scan(&self, _root: &Path, visitor: &dyn FileVisitor) -> io::Result<()> {
        // A session that was already cleaned up has nothing left to hand out
        let Some(queue) = self.registry.get(self.key) else {
            debug!(key = %self.key, "Queue already removed");
            return Ok(());
        };

        while !self.cancelled.load(Ordering::SeqCst) {
            let Some(entry) = queue.take() else {
                break;
            };

            if let Err(e) = visitor.visit(entry.path(), entry.relative_path(), entry.size()) {
                warn!(
                    key = %self.key,
                    file = %entry.relative_path().display(),
                    error = %e,
                    "Visit failed, stopping remaining workers"
                );
                queue.shutdown_now();
                return Err(e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<String>>,
    }

    impl FileVisitor for Collect {
        fn visit(&self, _path: &Path, relative_path: &Path, _size: u64) -> io::Result<()> {
            self.seen.lock().push(relative_path.to_string_lossy().into_owned());
            Ok(())
        }
    }

    fn setup(files: &[&str]) -> (Arc<QueueRegistry>, SessionKey) {
        let registry = Arc::new(QueueRegistry::new());
        let key = SessionKey::new();
        let queue = registry.get_or_create(key);
        for file in files {
            queue.add(PathBuf::from("/src").join(file), PathBuf::from(file), 1);
        }
        (registry, key)
    }

    #[test]
    fn test_visits_until_end_of_stream() {
        let (registry, key) = setup(&["a.html", "b.html"]);
        registry.get(key).unwrap().shutdown();

        let visitor = Collect::default();
        QueueReadingDirScanner::new(key, Arc::clone(&registry), Arc::default())
            .scan(Path::new("/ignored"), &visitor)
            .unwrap();

        assert_eq!(*visitor.seen.lock(), vec!["a.html", "b.html"]);
    }

    #[test]
    fn test_visitor_failure_shuts_queue_down() {
        struct FailFirst;
        impl FileVisitor for FailFirst {
            fn visit(&self, _: &Path, _: &Path, _: u64) -> io::Result<()> {
                Err(io::Error::other("disk full"))
            }
        }

        let (registry, key) = setup(&["a.html", "b.html", "c.html"]);

        let err = QueueReadingDirScanner::new(key, Arc::clone(&registry), Arc::default())
            .scan(Path::new("/ignored"), &FailFirst)
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");

        // The remaining entries are gone, siblings see the end right away
        let queue = registry.get(key).unwrap();
        assert!(queue.take().is_none());
    }

    #[test]
    fn test_missing_queue_is_end_of_stream() {
        let registry = Arc::new(QueueRegistry::new());
        let visitor = Collect::default();

        QueueReadingDirScanner::new(SessionKey::new(), Arc::clone(&registry), Arc::default())
            .scan(Path::new("/ignored"), &visitor)
            .unwrap();

        assert!(visitor.seen.lock().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancelled_scanner_takes_nothing() {
        let (registry, key) = setup(&["a.html"]);
        let cancelled = Arc::new(AtomicBool::new(true));

        let visitor = Collect::default();
        QueueReadingDirScanner::new(key, Arc::clone(&registry), cancelled)
            .scan(Path::new("/ignored"), &visitor)
            .unwrap();

        assert!(visitor.seen.lock().is_empty());
        assert_eq!(registry.get(key).unwrap().pending(), 1);
    }
}
