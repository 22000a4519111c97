//! Fixed-size pool that runs copy workers
//!
//! Tasks are cancelled cooperatively: a task that has not started yet never
//! runs, and a running task sees the flag handed to it and is expected to
//! stop at its next check.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Why [`TaskHandle::wait`] returned without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The task did not finish in time
    Timeout,
    /// The task was cancelled before it produced a result
    Cancelled,
    /// The task panicked
    Lost,
}

pub struct WorkerPool {
    pool: ThreadPool,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("reportcopy-worker-{}", i))
            .panic_handler(|_| error!("Worker task panicked"))
            .build()?;

        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queue `task` on the pool
    ///
    /// The task receives its cancellation flag.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce(Arc<AtomicBool>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let handle = TaskHandle {
            result: receiver,
            cancelled: Arc::clone(&cancelled),
            finished: Arc::clone(&finished),
        };

        self.pool.spawn(move || {
            if !cancelled.load(Ordering::SeqCst) {
                let value = task(Arc::clone(&cancelled));
                let _ = sender.send(value);
            }
            finished.store(true, Ordering::SeqCst);
        });

        handle
    }
}

/// Result slot and cancellation switch of one submitted task
pub struct TaskHandle<T> {
    result: Receiver<T>,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    /// Wait up to `timeout` for the task's result
    pub fn wait(&self, timeout: Duration) -> Result<T, WaitError> {
        match self.result.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                if self.is_cancelled() {
                    Err(WaitError::Cancelled)
                } else {
                    Err(WaitError::Lost)
                }
            }
        }
    }

    /// Ask the task to stop; returns false if it had already finished
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the task has returned or was skipped after cancellation
    ///
    /// A panicking task never gets here; `wait` reports it as lost.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_submit_and_wait() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool.submit(|_| 21 * 2);

        assert_eq!(handle.wait(Duration::from_secs(5)), Ok(42));
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.threads(), 1);
    }

    #[test]
    fn test_busy_pool_times_out_and_cancelled_task_never_runs() {
        let pool = WorkerPool::new(1).unwrap();
        let blocker = pool.submit(|_| thread::sleep(Duration::from_millis(300)));

        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let ran = Arc::clone(&ran);
            pool.submit(move |_| ran.store(true, Ordering::SeqCst))
        };

        assert_eq!(handle.wait(Duration::ZERO), Err(WaitError::Timeout));
        assert!(handle.cancel());
        assert!(handle.is_cancelled());

        blocker.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(handle.wait(Duration::from_secs(5)), Err(WaitError::Cancelled));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(handle.is_finished());
    }

    #[test]
    fn test_running_task_sees_cancellation() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(|cancelled| {
            while !cancelled.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            "stopped"
        });

        thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert_eq!(handle.wait(Duration::from_secs(5)), Ok("stopped"));
    }

    #[test]
    fn test_panicking_task_is_lost() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(|_| -> u32 { panic!("copy worker blew up") });

        assert_eq!(handle.wait(Duration::from_secs(5)), Err(WaitError::Lost));
    }

    #[test]
    fn test_cancel_after_finish() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(|_| 1);
        assert_eq!(handle.wait(Duration::from_secs(5)), Ok(1));

        // Give the pool thread a moment to flag completion
        for _ in 0..100 {
            if handle.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.cancel());
    }
}
