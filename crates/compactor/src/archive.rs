//! Moving originals out of the way after a successful transcode.
//!
//! Runs after the scheduler has drained. Archiving is best effort per file: a failed move is
//! reported and never touches the batch's recorded status or its siblings.

use crate::job::JobResult;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while archiving one file.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A file of the same name is already archived; it is never overwritten.
    #[error("Archive already contains {}", .0.display())]
    DestinationExists(PathBuf),

    /// The archive directory could not be created.
    #[error("Failed to create archive directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source has no file name to archive under.
    #[error("Not a file path: {}", .0.display())]
    NoFileName(PathBuf),

    /// Rename and copy both failed.
    #[error("Failed to move {}: {source}", .path.display())]
    Move {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What happened to the originals of a run
#[derive(Debug, Default)]
pub struct ArchiveReport {
    /// `(source, destination)` of every moved file
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Files left in place with the reason
    pub failures: Vec<(PathBuf, ArchiveError)>,
}

impl ArchiveReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Move `source` into `archive_dir` under its own file name.
///
/// Tries a rename first and falls back to copy + remove when the archive lives on another
/// filesystem.
pub fn move_into(source: &Path, archive_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let name = source
        .file_name()
        .ok_or_else(|| ArchiveError::NoFileName(source.to_path_buf()))?;
    let destination = archive_dir.join(name);

    if destination.exists() {
        return Err(ArchiveError::DestinationExists(destination));
    }

    if fs::rename(source, &destination).is_err() {
        let wrap = |source_err| ArchiveError::Move {
            path: source.to_path_buf(),
            source: source_err,
        };
        fs::copy(source, &destination).map_err(wrap)?;
        if let Err(e) = fs::remove_file(source) {
            // Leave exactly one copy behind
            let _ = fs::remove_file(&destination);
            return Err(wrap(e));
        }
    }

    Ok(destination)
}

/// Move the source files of every succeeded batch into `archive_dir`.
pub fn archive_originals(results: &[JobResult], archive_dir: &Path) -> ArchiveReport {
    let mut report = ArchiveReport::default();

    let sources: Vec<&Path> = results
        .iter()
        .filter(|r| r.is_success())
        .flat_map(|r| r.batch.files.iter().map(|f| f.path.as_path()))
        .collect();
    if sources.is_empty() {
        return report;
    }

    if let Err(source) = fs::create_dir_all(archive_dir) {
        log::warn!(
            "Failed to create archive directory {}: {}",
            archive_dir.display(),
            source
        );
        for path in sources {
            report.failures.push((
                path.to_path_buf(),
                ArchiveError::CreateDir {
                    path: archive_dir.to_path_buf(),
                    source: io::Error::new(source.kind(), source.to_string()),
                },
            ));
        }
        return report;
    }

    for path in sources {
        match move_into(path, archive_dir) {
            Ok(destination) => {
                log::debug!("Archived {} to {}", path.display(), destination.display());
                report.moved.push((path.to_path_buf(), destination));
            }
            Err(e) => {
                log::warn!("Could not archive {}: {}", path.display(), e);
                report.failures.push((path.to_path_buf(), e));
            }
        }
    }

    log::info!(
        "Archived {} original(s) to {}",
        report.moved.len(),
        archive_dir.display()
    );
    report
}
