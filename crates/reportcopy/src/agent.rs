//! Source node running behind a message channel
//!
//! The agent owns a [`LocalNode`] with its own registry and only talks in
//! JSON strings, so nothing but serialized values crosses between the
//! controller and the node. Every request is served on its own thread since
//! a streaming request blocks on the session queue for as long as the
//! transfer runs.
//!
//! ```text
//!  controller                         agent thread
//!  ----------                         ------------
//!  RemoteNode::act ── {"act":..} ───▶ LocalNode::execute ── reply ──▶
//!  RemoteNode::copy_queue_to
//!      ◀── FileStart, Chunk.., FileEnd, ..., Finished ── QueueReadingDirScanner
//!                                                          + StreamVisitor
//! ```
//!
//! Files are streamed in chunks of at most [`CHUNK_SIZE`] bytes and the reply
//! channel holds [`STREAM_WINDOW`] frames, so neither side ever buffers a
//! whole file.

use crate::copy::PartialFile;
use crate::error::NodeError;
use crate::node::{LocalNode, NodeMessage, NodeTask, SourceNode};
use crate::reader::QueueReadingDirScanner;
use crate::registry::SessionKey;
use crate::scanner::{DirScanner, FileVisitor};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Frames in flight per stream before the agent waits for the controller
pub const STREAM_WINDOW: usize = 4;

/// Largest file piece carried by one frame
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AgentRequest {
    Act(NodeTask),
    Stream { key: SessionKey },
}

struct Envelope {
    payload: String,
    reply: Sender<String>,
}

/// Thread serving a source node
pub struct NodeAgent {
    thread: JoinHandle<()>,
}

impl NodeAgent {
    /// Start serving `node`
    ///
    /// The agent stops once every [`RemoteNode`] handle has been dropped.
    pub fn spawn(node: LocalNode) -> io::Result<(RemoteNode, NodeAgent)> {
        let (sender, receiver) = unbounded::<Envelope>();

        let thread = thread::Builder::new()
            .name("reportcopy-agent".to_string())
            .spawn(move || serve(node, receiver))?;

        Ok((RemoteNode { sender }, NodeAgent { thread }))
    }

    /// Wait for the agent to stop
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("Node agent panicked");
        }
    }
}

fn serve(node: LocalNode, requests: Receiver<Envelope>) {
    for envelope in requests {
        let node = node.clone();
        let spawned = thread::Builder::new()
            .name("reportcopy-agent-request".to_string())
            .spawn(move || handle(node, envelope));
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to start request thread");
        }
    }
    debug!("Node agent stopped");
}

fn handle(node: LocalNode, envelope: Envelope) {
    let request: AgentRequest = match serde_json::from_str(&envelope.payload) {
        Ok(request) => request,
        Err(e) => {
            send(
                &envelope.reply,
                &NodeMessage::Failed {
                    message: format!("malformed request: {}", e),
                },
            );
            return;
        }
    };

    match request {
        AgentRequest::Act(task) => {
            let reply = node.execute(task);
            send(&envelope.reply, &reply);
        }
        AgentRequest::Stream { key } => stream(&node, key, &envelope.reply),
    }
}

fn send(reply: &Sender<String>, message: &NodeMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => reply.send(json).is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode reply");
            false
        }
    }
}

/// Sends every visited file to the controller as a run of frames
struct StreamVisitor<'a> {
    frames: &'a Sender<String>,
    sent: AtomicU64,
}

impl StreamVisitor<'_> {
    fn emit(&self, frame: &NodeMessage) -> io::Result<()> {
        let json = serde_json::to_string(frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.frames
            .send(json)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "controller stopped reading"))
    }
}

impl FileVisitor for StreamVisitor<'_> {
    fn visit(&self, path: &Path, relative_path: &Path, _size: u64) -> io::Result<()> {
        let mut source = File::open(path)?;
        let modified = source.metadata()?.modified().ok();

        self.emit(&NodeMessage::FileStart {
            relative_path: relative_path.to_path_buf(),
            modified,
        })?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.emit(&NodeMessage::Chunk {
                data: buffer[..n].to_vec(),
            })?;
        }

        self.emit(&NodeMessage::FileEnd)?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn stream(node: &LocalNode, key: SessionKey, frames: &Sender<String>) {
    let scanner = QueueReadingDirScanner::new(key, Arc::clone(node.registry()), Arc::default());
    let visitor = StreamVisitor {
        frames,
        sent: AtomicU64::new(0),
    };

    let last = match scanner.scan(Path::new(""), &visitor) {
        Ok(()) => NodeMessage::Finished {
            files: visitor.sent.load(Ordering::SeqCst),
        },
        Err(e) => NodeMessage::Failed {
            message: e.to_string(),
        },
    };
    send(frames, &last);
}

/// Controller-side handle to a [`NodeAgent`]
#[derive(Clone)]
pub struct RemoteNode {
    sender: Sender<Envelope>,
}

impl RemoteNode {
    fn request(&self, request: &AgentRequest, window: usize) -> Result<Receiver<String>, NodeError> {
        let payload = serde_json::to_string(request)?;
        let (reply, replies) = bounded(window);
        self.sender
            .send(Envelope { payload, reply })
            .map_err(|_| NodeError::Disconnected)?;
        Ok(replies)
    }
}

impl SourceNode for RemoteNode {
    fn act(&self, task: NodeTask) -> Result<NodeMessage, NodeError> {
        let replies = self.request(&AgentRequest::Act(task), 1)?;
        let json = replies.recv().map_err(|_| NodeError::Disconnected)?;

        let reply: NodeMessage = serde_json::from_str(&json)?;
        match reply {
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
        fs::create_dir_all(target_dir)?;

        // Dropping `frames` on any early return makes the agent's next send
        // fail, which shuts the session queue down on the node
        let frames = self
            .request(&AgentRequest::Stream { key }, STREAM_WINDOW)
            .map_err(NodeError::into_io)?;

        let mut copied = 0u64;
        // File being received, with its modification time
        let mut current: Option<(PartialFile, Option<SystemTime>)> = None;
        loop {
            if cancelled.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "copy cancelled"));
            }

            let json = frames
                .recv()
                .map_err(|_| NodeError::Disconnected.into_io())?;
            let frame: NodeMessage =
                serde_json::from_str(&json).map_err(|e| NodeError::Codec(e).into_io())?;

            match frame {
                NodeMessage::FileStart {
                    relative_path,
                    modified,
                } if current.is_none() => {
                    current = Some((PartialFile::create(target_dir, &relative_path)?, modified));
                }
                NodeMessage::Chunk { data } => match current.as_mut() {
                    Some((file, _)) => file.write_all(&data)?,
                    None => return Err(out_of_order("chunk outside of a file".to_string())),
                },
                NodeMessage::FileEnd => match current.take() {
                    Some((file, modified)) => {
                        file.install(modified)?;
                        copied += 1;
                    }
                    None => return Err(out_of_order("end outside of a file".to_string())),
                },
                NodeMessage::Finished { files } if current.is_none() => {
                    debug!(key = %key, sent = files, copied, "Stream finished");
                    return Ok(copied);
                }
                NodeMessage::Failed { message } => {
                    return Err(NodeError::Remote(message).into_io());
                }
                other => return Err(out_of_order(format!("{:?}", other))),
            }
        }
    }
}

fn out_of_order(reply: String) -> io::Error {
    NodeError::UnexpectedReply {
        task: "stream",
        reply,
    }
    .into_io()
}
