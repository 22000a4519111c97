//! Byte copy from a scanner into a target directory
//!
//! Files are written to a temporary sibling and renamed into place. When two
//! workers ever install the same relative path, the last rename wins and
//! readers never observe a half-written file.

use crate::scanner::{DirScanner, FileVisitor};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;
use uuid::Uuid;

/// Map a relative path onto `target_dir`, refusing anything that would
/// land outside of it
pub fn resolve_target(target_dir: &Path, relative_path: &Path) -> io::Result<PathBuf> {
    let mut resolved = target_dir.to_path_buf();
    let mut depth = 0usize;

    for component in relative_path.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "refusing to copy '{}' outside of the target",
                        relative_path.display()
                    ),
                ))
            }
        }
    }

    if depth == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' does not name a file", relative_path.display()),
        ));
    }

    Ok(resolved)
}

/// A file being written to a temporary sibling of its destination
///
/// Nothing is visible at the destination until [`PartialFile::install`]
/// renames it into place. Dropping it without installing removes the
/// temporary file.
pub struct PartialFile {
    file: File,
    partial: PathBuf,
    destination: PathBuf,
    written: u64,
    installed: bool,
}

impl PartialFile {
    pub fn create(target_dir: &Path, relative_path: &Path) -> io::Result<Self> {
        let destination = resolve_target(target_dir, relative_path)?;
        let parent = destination.parent().unwrap_or(target_dir);
        fs::create_dir_all(parent)?;

        let mut name = OsString::from(".");
        if let Some(file_name) = destination.file_name() {
            name.push(file_name);
        }
        name.push(format!(".{}.part", Uuid::new_v4().simple()));
        let partial = parent.join(name);

        let file = File::create(&partial)?;
        Ok(Self {
            file,
            partial,
            destination,
            written: 0,
            installed: false,
        })
    }

    /// Flush to disk and rename over the destination
    ///
    /// Returns the number of bytes written.
    pub fn install(mut self, modified: Option<SystemTime>) -> io::Result<u64> {
        if let Some(modified) = modified {
            self.file.set_modified(modified)?;
        }
        self.file.sync_all()?;
        fs::rename(&self.partial, &self.destination)?;
        self.installed = true;
        Ok(self.written)
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.installed {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Write `contents` to `relative_path` below `target_dir`
///
/// Returns the number of bytes written.
pub fn install_file(
    target_dir: &Path,
    relative_path: &Path,
    contents: &mut dyn Read,
    modified: Option<SystemTime>,
) -> io::Result<u64> {
    let mut partial = PartialFile::create(target_dir, relative_path)?;
    io::copy(contents, &mut partial)?;
    let written = partial.install(modified)?;

    trace!(file = %relative_path.display(), bytes = written, "Installed");
    Ok(written)
}

/// Copies every visited file into a target directory
pub struct CopyVisitor {
    target_dir: PathBuf,
    cancelled: Arc<AtomicBool>,
    copied: AtomicU64,
}

impl CopyVisitor {
    pub fn new(target_dir: PathBuf, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            target_dir,
            cancelled,
            copied: AtomicU64::new(0),
        }
    }

    /// Files copied so far
    pub fn copied(&self) -> u64 {
        self.copied.load(Ordering::SeqCst)
    }
}

impl FileVisitor for CopyVisitor {
    fn visit(&self, path: &Path, relative_path: &Path, _size: u64) -> io::Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "copy cancelled"));
        }

        let mut source = File::open(path)?;
        let modified = source.metadata()?.modified().ok();
        install_file(&self.target_dir, relative_path, &mut source, modified)?;

        self.copied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Copy every file `scanner` reports below `source_root` into `target_dir`
///
/// Returns the number of files this call copied.
pub fn copy_recursive_to(
    source_root: &Path,
    scanner: &dyn DirScanner,
    target_dir: &Path,
    cancelled: Arc<AtomicBool>,
) -> io::Result<u64> {
    fs::create_dir_all(target_dir)?;

    let visitor = CopyVisitor::new(target_dir.to_path_buf(), cancelled);
    scanner.scan(source_root, &visitor)?;

    Ok(visitor.copied())
}
