//! Startup checks
//!
//! Verifies the transcoder can actually be run before any batch is scheduled.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Transcoder not available: {0}")]
    TranscoderUnavailable(String),
}

/// Check that `<ffmpeg> -version` runs and exits successfully.
///
/// Returns the first line of the version banner.
pub async fn check_transcoder_available(ffmpeg: &Path) -> Result<String, StartupError> {
    let output = Command::new(ffmpeg)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            StartupError::TranscoderUnavailable(format!(
                "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
                ffmpeg.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::TranscoderUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg.display(),
            output.status
        )));
    }

    let banner = String::from_utf8_lossy(&output.stdout);
    let first_line = banner.lines().next().unwrap_or("").trim().to_string();
    log::debug!("Using {}", first_line);
    Ok(first_line)
}
