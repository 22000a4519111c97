use crate::error::{Result, TransferError};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Pattern that includes every file
pub const INCLUDE_ALL_PATTERN: &str = "**/*";

/// VCS metadata and editor droppings skipped unless asked otherwise
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.gitignore",
    "**/.svn/**",
    "**/.hg/**",
    "**/CVS/**",
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/._*",
    "**/.DS_Store",
];

/// Receives the files found by a [`DirScanner`]
///
/// Visitors are shared between threads, so `visit` takes `&self`. The
/// relative path keeps the file name bytes exactly as the filesystem
/// reported them.
pub trait FileVisitor: Sync {
    fn visit(&self, path: &Path, relative_path: &Path, size: u64) -> io::Result<()>;
}

/// Produces files below a root directory and pushes them to a visitor
pub trait DirScanner: Send + Sync {
    fn scan(&self, root: &Path, visitor: &dyn FileVisitor) -> io::Result<()>;
}

/// Serializable description of which files to pick up
///
/// Patterns are Ant style: comma separated, relative to the root, `*`
/// stays inside one directory and `**` spans any number of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPattern {
    pub includes: String,
    #[serde(default)]
    pub excludes: Option<String>,
    #[serde(default = "default_true")]
    pub default_excludes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScanPattern {
    fn default() -> Self {
        Self::all()
    }
}

impl ScanPattern {
    pub fn all() -> Self {
        Self::new(INCLUDE_ALL_PATTERN)
    }

    /// An empty include pattern falls back to including everything
    pub fn new(includes: &str) -> Self {
        let includes = if includes.trim().is_empty() {
            INCLUDE_ALL_PATTERN.to_string()
        } else {
            includes.to_string()
        };
        Self {
            includes,
            excludes: None,
            default_excludes: true,
        }
    }

    pub fn with_excludes(mut self, excludes: &str) -> Self {
        self.excludes = Some(excludes.to_string()).filter(|e| !e.trim().is_empty());
        self
    }

    pub fn with_default_excludes(mut self, enabled: bool) -> Self {
        self.default_excludes = enabled;
        self
    }

    /// Build the scanner this pattern describes
    pub fn compile(&self) -> Result<GlobScanner> {
        let includes = build_set(split_patterns(&self.includes))?;

        let mut exclude_patterns: Vec<String> = self
            .excludes
            .as_deref()
            .map(split_patterns)
            .unwrap_or_default();
        if self.default_excludes {
            exclude_patterns.extend(DEFAULT_EXCLUDES.iter().map(|p| p.to_string()));
        }
        let excludes = build_set(exclude_patterns)?;

        Ok(GlobScanner { includes, excludes })
    }
}

fn split_patterns(patterns: &str) -> Vec<String> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalise_pattern)
        .collect()
}

// "dir/" means everything below dir, and patterns are always relative
fn normalise_pattern(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    let pattern = pattern.trim_start_matches('/');
    if pattern.ends_with('/') {
        format!("{}**", pattern)
    } else {
        pattern.to_string()
    }
}

fn build_set(patterns: Vec<String>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in &patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| TransferError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| TransferError::Pattern {
        pattern: patterns.join(","),
        source,
    })
}

/// Walks a directory tree and reports files matching a [`ScanPattern`]
pub struct GlobScanner {
    includes: GlobSet,
    excludes: GlobSet,
}

impl GlobScanner {
    pub fn matches(&self, relative_path: &Path) -> bool {
        self.includes.is_match(relative_path) && !self.excludes.is_match(relative_path)
    }
}

impl DirScanner for GlobScanner {
    fn scan(&self, root: &Path, visitor: &dyn FileVisitor) -> io::Result<()> {
        let metadata = fs::metadata(root)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry?;

            // Symlinks count when they resolve to a regular file
            let is_file = if entry.path_is_symlink() {
                fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false)
            } else {
                entry.file_type().is_file()
            };
            if !is_file {
                continue;
            }

            let relative = relative_path(root, entry.path());
            if !self.matches(&relative) {
                continue;
            }

            let size = fs::metadata(entry.path())?.len();
            visitor.visit(entry.path(), &relative, size)?;
        }

        Ok(())
    }
}

/// Path of `path` below `root`
pub fn relative_path(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
