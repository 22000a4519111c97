//! The machine that owns the source directory
//!
//! Only two units of work ever cross to the source node: the scan that fills
//! a session queue and the cleanup that removes it (plus opening the queue
//! up front). They travel as [`NodeTask`] values so they can be shipped to
//! another process; replies come back as [`NodeMessage`]s.

use crate::copy::copy_recursive_to;
use crate::error::NodeError;
use crate::queue::Statistic;
use crate::reader::QueueReadingDirScanner;
use crate::registry::{QueueRegistry, SessionKey};
use crate::remover::QueueShutdownAndRemover;
use crate::scanner::ScanPattern;
use crate::writer::DirScanningQueueWriter;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;

/// Work executed on the source node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum NodeTask {
    /// Register the session queue so workers can find it
    OpenQueue { key: SessionKey },
    /// Walk `root` and fill the session queue
    ScanIntoQueue {
        key: SessionKey,
        #[serde(with = "wire_path")]
        root: PathBuf,
        pattern: ScanPattern,
    },
    /// Drop the session queue and release its consumers
    ShutdownAndRemove { key: SessionKey },
}

impl NodeTask {
    pub fn name(&self) -> &'static str {
        match self {
            NodeTask::OpenQueue { .. } => "open_queue",
            NodeTask::ScanIntoQueue { .. } => "scan_into_queue",
            NodeTask::ShutdownAndRemove { .. } => "shutdown_and_remove",
        }
    }
}

/// Reply or stream frame sent back by the source node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum NodeMessage {
    Opened,
    Scanned {
        statistic: Statistic,
    },
    Removed {
        was_present: bool,
    },
    /// Start of a file streamed out of the session queue
    FileStart {
        #[serde(with = "wire_path")]
        relative_path: PathBuf,
        modified: Option<SystemTime>,
    },
    /// Next piece of the current file
    Chunk {
        #[serde(with = "wire_bytes")]
        data: Vec<u8>,
    },
    /// The current file is complete
    FileEnd,
    /// End of a file stream
    Finished {
        files: u64,
    },
    Failed {
        message: String,
    },
}

/// Access to the node that owns the source directory
pub trait SourceNode: Send + Sync {
    /// Run `task` on the node
    ///
    /// A task that ran and failed comes back as [`NodeError::Remote`].
    fn act(&self, task: NodeTask) -> Result<NodeMessage, NodeError>;

    /// Copy files out of the session queue into a local directory
    ///
    /// Returns the number of files this call copied.
    fn copy_queue_to(
        &self,
        key: SessionKey,
        target_dir: &Path,
        cancelled: Arc<AtomicBool>,
    ) -> io::Result<u64>;
}

/// Byte strings travel as base64 text
mod wire_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Paths travel as their raw bytes so names that are not UTF-8 arrive intact
///
/// Where the platform has no byte view of a path, only UTF-8 paths can be
/// encoded and anything else is an encoding error.
mod wire_path {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::path::{Path, PathBuf};

    #[cfg(unix)]
    fn to_bytes(path: &Path) -> Result<&[u8], String> {
        use std::os::unix::ffi::OsStrExt;
        Ok(path.as_os_str().as_bytes())
    }

    #[cfg(not(unix))]
    fn to_bytes(path: &Path) -> Result<&[u8], String> {
        path.to_str()
            .map(str::as_bytes)
            .ok_or_else(|| format!("'{}' is not valid UTF-8", path.display()))
    }

    #[cfg(unix)]
    fn from_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
        use std::os::unix::ffi::OsStringExt;
        Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
    }

    #[cfg(not(unix))]
    fn from_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
        String::from_utf8(bytes)
            .map(PathBuf::from)
            .map_err(|e| e.to_string())
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = to_bytes(path).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

fn unexpected(task: &'static str, reply: NodeMessage) -> NodeError {
    NodeError::UnexpectedReply {
        task,
        reply: format!("{:?}", reply),
    }
}

pub fn open_queue(node: &dyn SourceNode, key: SessionKey) -> Result<(), NodeError> {
    match node.act(NodeTask::OpenQueue { key })? {
        NodeMessage::Opened => Ok(()),
        other => Err(unexpected("open_queue", other)),
    }
}

pub fn scan_into_queue(
    node: &dyn SourceNode,
    key: SessionKey,
    root: &Path,
    pattern: &ScanPattern,
) -> Result<Statistic, NodeError> {
    let task = NodeTask::ScanIntoQueue {
        key,
        root: root.to_path_buf(),
        pattern: pattern.clone(),
    };
    match node.act(task)? {
        NodeMessage::Scanned { statistic } => Ok(statistic),
        other => Err(unexpected("scan_into_queue", other)),
    }
}

/// Returns whether the queue was still registered
pub fn shutdown_and_remove(node: &dyn SourceNode, key: SessionKey) -> Result<bool, NodeError> {
    match node.act(NodeTask::ShutdownAndRemove { key })? {
        NodeMessage::Removed { was_present } => Ok(was_present),
        other => Err(unexpected("shutdown_and_remove", other)),
    }
}

/// Source directory on this machine
#[derive(Clone, Default)]
pub struct LocalNode {
    registry: Arc<QueueRegistry>,
}

impl LocalNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<QueueRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    /// Execute a task against this node's registry
    ///
    /// Failures are reported as [`NodeMessage::Failed`] so the same
    /// function can answer tasks arriving from another process.
    pub fn execute(&self, task: NodeTask) -> NodeMessage {
        match task {
            NodeTask::OpenQueue { key } => {
                self.registry.get_or_create(key);
                NodeMessage::Opened
            }
            NodeTask::ScanIntoQueue { key, root, pattern } => {
                let scanner = match pattern.compile() {
                    Ok(scanner) => scanner,
                    Err(e) => {
                        // Nobody will fill the queue, release the workers
                        self.registry.get_or_create(key).shutdown_now();
                        return NodeMessage::Failed {
                            message: e.to_string(),
                        };
                    }
                };
                match DirScanningQueueWriter::new(key).invoke(&self.registry, &root, &scanner) {
                    Ok(statistic) => NodeMessage::Scanned { statistic },
                    Err(e) => NodeMessage::Failed {
                        message: e.to_string(),
                    },
                }
            }
            NodeTask::ShutdownAndRemove { key } => NodeMessage::Removed {
                was_present: QueueShutdownAndRemover::new(key).invoke(&self.registry),
            },
        }
    }
}

impl SourceNode for LocalNode {
    fn act(&self, task: NodeTask) -> Result<NodeMessage, NodeError> {
        match self.execute(task) {
            NodeMessage::Failed { message } => Err(NodeError::Remote(message)),
            reply => Ok(reply),
        }
    }

    fn copy_queue_to(
        &self,
        key: SessionKey,
        target_dir: &Path,
        cancelled: Arc<AtomicBool>,
    ) -> io::Result<u64> {
        let scanner =
            QueueReadingDirScanner::new(key, Arc::clone(&self.registry), Arc::clone(&cancelled));
        // Entries carry absolute paths, the root is not consulted
        copy_recursive_to(Path::new(""), &scanner, target_dir, cancelled)
    }
}
