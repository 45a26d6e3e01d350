//! File discovery for a transcode run.
//!
//! Resolves a target directory and a selection pattern into the sorted list of source files.
//! Only direct children of the target directory are considered.

use crate::pattern::{glob_match, mask_to_glob};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur while discovering source files.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No file matched the selection; the run has nothing to do.
    #[error("No files matching '{pattern}' found in {}", .root.display())]
    NoMatch { root: PathBuf, pattern: String },

    /// The target is not a directory.
    #[error("Target is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// IO error resolving the target or a candidate.
    #[error("IO error during discovery: {0}")]
    Io(#[from] std::io::Error),

    /// Directory walk failed.
    #[error("Failed to read target directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// How candidate files are selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Plain glob pattern, e.g. `*.avi`
    Glob(String),
    /// Masked pattern where `#` marks fragment index positions
    Masked(String),
}

impl Selection {
    /// Glob actually used to match file names.
    pub fn match_pattern(&self) -> String {
        match self {
            Selection::Glob(glob) => glob.clone(),
            Selection::Masked(mask) => mask_to_glob(mask),
        }
    }
}

/// A discovered input file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceFile {
    /// Absolute, canonical path.
    pub path: PathBuf,
    /// Size in bytes at discovery time.
    pub size_bytes: u64,
}

impl SourceFile {
    /// File name as a string (lossy for non UTF-8 names).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Discover the regular files in `root` matching `selection`.
///
/// - Follows symlinks so linked files are treated like the files they point to
/// - Drops files whose name matches `exclude`
/// - Canonicalizes every path and sorts the result lexicographically
///
/// Returns [`DiscoveryError::NoMatch`] when nothing matched.
pub fn discover(
    root: &Path,
    selection: &Selection,
    exclude: Option<&str>,
) -> Result<Vec<SourceFile>, DiscoveryError> {
    let root = root.canonicalize()?;
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root));
    }

    let pattern = selection.match_pattern();
    let mut files = Vec::new();

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // Dangling symlinks and unreadable entries are not candidates
            Err(e) if e.depth() > 0 => {
                log::debug!("Skipping unreadable entry: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !glob_match(&pattern, &name) {
            continue;
        }
        if exclude.is_some_and(|ex| glob_match(ex, &name)) {
            log::debug!("Excluded {}", name);
            continue;
        }

        let metadata = entry.metadata()?;
        files.push(SourceFile {
            path: entry.path().canonicalize()?,
            size_bytes: metadata.len(),
        });
    }

    if files.is_empty() {
        return Err(DiscoveryError::NoMatch { root, pattern });
    }

    files.sort();
    Ok(files)
}
