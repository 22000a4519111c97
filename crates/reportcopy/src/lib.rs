//! reportcopy - Parallel report directory copy
//!
//! Copies the files of a generated report directory (for example an HTML
//! report) into a publishing location. One producer walks the source tree on
//! the node that owns it and feeds a session queue; several workers drain
//! that queue and copy each file into the target directory.
//!
//! # Architecture
//!
//! ```text
//!   source node                               controller
//! ┌─────────────────────────────┐      ┌──────────────────────────────┐
//! │ DirScanningQueueWriter      │      │ MultithreadedFileCopyHelper  │
//! │   GlobScanner ──► queue ────┼──┬──►│   worker 1 ─┐                │
//! │                 (session)   │  ├──►│   worker 2 ─┼─► target dir   │
//! │ QueueShutdownAndRemover     │  └──►│   worker N ─┘                │
//! └─────────────────────────────┘      └──────────────────────────────┘
//! ```
//!
//! The queue is closed with an end-of-stream marker that every consumer
//! puts back after reading it, so one marker stops all workers. A failing
//! side drops the pending entries so the other side stops early.
//!
//! # Example
//!
//! ```bash
//! reportcopy copy build/reports/tests/html /srv/www/reports -w 8
//! ```

pub mod agent;
pub mod copy;
pub mod error;
pub mod fanout;
pub mod helper;
pub mod node;
pub mod pool;
pub mod publish;
pub mod queue;
pub mod reader;
pub mod registry;
pub mod remover;
pub mod scanner;
pub mod settings;
pub mod writer;

pub use agent::{NodeAgent, RemoteNode};
pub use error::{NodeError, Result, TransferError};
pub use helper::{CopyRequest, MultithreadedFileCopyHelper};
pub use node::{LocalNode, NodeMessage, NodeTask, SourceNode};
pub use pool::WorkerPool;
pub use publish::{copy_report_directory, ReportCopier};
pub use queue::{FileEntry, FileEntryQueue, Statistic};
pub use registry::{QueueRegistry, SessionKey};
pub use scanner::{DirScanner, FileVisitor, GlobScanner, ScanPattern};
pub use settings::Settings;
