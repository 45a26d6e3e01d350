//! Transcoder interface
//!
//! The transcoder is an external process. The core only hands it a typed request and reads
//! back the exit status and diagnostic text.

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_args, build_ffmpeg_command, FfmpegSettings, FfmpegTranscoder};

use async_trait::async_trait;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for transcoder invocation
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The transcoder process could not be started
    #[error("Failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// IO error while preparing or collecting the run
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Input handed to the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeInput {
    /// A single source file
    File(PathBuf),
    /// A concat list naming the fragments in order
    ConcatList(PathBuf),
}

/// Everything one transcoder invocation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub input: TranscodeInput,
    pub output: PathBuf,
    /// CRF quality factor
    pub crf: u32,
    /// Speed/quality preset name
    pub preset: String,
    /// Replace an existing output instead of refusing
    pub overwrite: bool,
}

/// Completion of one transcoder run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    /// Process exit code; `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Everything the process wrote
    pub diagnostics: String,
}

impl TranscodeOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// An external transcoder.
///
/// Implementations must not block the executor: the scheduler drives many transcodes from
/// a single task.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutcome, EncodeError>;
}

/// Write a concat demuxer list naming `files` in order.
///
/// Each line is `file '<path>'`; single quotes inside a path are written as `'\''`.
pub fn write_concat_list(list_path: &Path, files: &[PathBuf]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(list_path)?);
    for file in files {
        let escaped = file.to_string_lossy().replace('\'', r"'\''");
        writeln!(writer, "file '{}'", escaped)?;
    }
    writer.flush()
}
