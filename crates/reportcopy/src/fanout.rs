use crate::queue::FileEntryQueue;
use crate::scanner::{DirScanner, FileVisitor};
use crate::writer::QueueVisitor;
use std::io;
use std::path::Path;
use std::thread;

/// Runs a delegate scan on the calling thread and spreads the visits over
/// several threads
///
/// The first error wins: a scan error is preferred over visit errors, and a
/// visit error drops the remaining entries so the other threads stop early.
/// All threads have exited when `scan` returns.
pub struct MultithreadedDirScanner<S> {
    delegate: S,
    workers: usize,
}

impl<S: DirScanner> MultithreadedDirScanner<S> {
    pub fn new(delegate: S, workers: usize) -> Self {
        Self {
            delegate,
            workers: workers.max(1),
        }
    }
}

fn drain(queue: &FileEntryQueue, visitor: &dyn FileVisitor) -> io::Result<()> {
    while let Some(entry) = queue.take() {
        if let Err(e) = visitor.visit(entry.path(), entry.relative_path(), entry.size()) {
            queue.shutdown_now();
            return Err(e);
        }
    }
    Ok(())
}

impl<S: DirScanner> DirScanner for MultithreadedDirScanner<S> {
    fn scan(&self, root: &Path, visitor: &dyn FileVisitor) -> io::Result<()> {
        let queue = FileEntryQueue::new();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|_| scope.spawn(|| drain(&queue, visitor)))
                .collect();

            let scanned = self.delegate.scan(root, &QueueVisitor { queue: &queue });
            match scanned {
                Ok(()) => queue.shutdown(),
                Err(_) => queue.shutdown_now(),
            }

            let mut first_error = scanned.err();
            for handle in handles {
                let visited = handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("visit thread panicked")));
                if let Err(e) = visited {
                    first_error.get_or_insert(e);
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}
