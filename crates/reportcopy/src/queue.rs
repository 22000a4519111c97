//! File entry queue shared between one producer and many copy workers
//!
//! The queue is unbounded and carries a distinguished end-of-stream item.
//! A consumer that dequeues the end-of-stream item puts it straight back,
//! so every consumer sees it no matter how many are draining the queue.

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file found by the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    path: PathBuf,
    relative_path: PathBuf,
    size: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, relative_path: PathBuf, size: u64) -> Self {
        Self {
            path,
            relative_path,
            size,
        }
    }

    /// Absolute path on the node that owns the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the scan root
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Snapshot of what a queue has seen since it was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    pub overall_count: u64,
    pub overall_size: u64,
}

#[derive(Debug)]
enum QueueItem {
    Entry(FileEntry),
    EndOfStream,
}

/// Blocking multi-consumer queue of file entries
pub struct FileEntryQueue {
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    // Held across the send so a snapshot never counts an entry that is not
    // queued yet, nor a count without its size
    statistic: Mutex<Statistic>,
}

impl FileEntryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            statistic: Mutex::new(Statistic::default()),
        }
    }

    /// Append a file and count it
    pub fn add(&self, path: PathBuf, relative_path: PathBuf, size: u64) -> FileEntry {
        let entry = FileEntry::new(path, relative_path, size);

        let mut statistic = self.statistic.lock();
        // Both ends live in self, so the channel can never be disconnected
        let _ = self.sender.send(QueueItem::Entry(entry.clone()));
        statistic.overall_count += 1;
        statistic.overall_size += size;

        entry
    }

    /// Wait for the next entry
    ///
    /// Returns `None` once the queue has been shut down and every entry
    /// queued before the shutdown has been handed out. The end-of-stream
    /// item is put back before returning so other consumers see it too.
    pub fn take(&self) -> Option<FileEntry> {
        match self.receiver.recv() {
            Ok(QueueItem::Entry(entry)) => Some(entry),
            Ok(QueueItem::EndOfStream) => {
                let _ = self.sender.send(QueueItem::EndOfStream);
                None
            }
            Err(_) => None,
        }
    }

    /// Signal that no more entries will be added
    ///
    /// Entries already queued are still handed out.
    pub fn shutdown(&self) {
        let _ = self.sender.send(QueueItem::EndOfStream);
    }

    /// Drop all pending entries and signal the end of the stream
    pub fn shutdown_now(&self) {
        while self.receiver.try_recv().is_ok() {}
        self.shutdown();
    }

    /// Number of queued items, end-of-stream markers included
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn statistic(&self) -> Statistic {
        *self.statistic.lock()
    }
}

impl Default for FileEntryQueue {
    fn default() -> Self {
        Self::new()
    }
}
