//! FFmpeg transcoder
//!
//! Builds ffmpeg argument vectors from a typed [`TranscodeRequest`] and runs the process,
//! capturing its exit status and diagnostic output. Nothing is ever passed through a shell.

use super::{EncodeError, TranscodeInput, TranscodeOutcome, TranscodeRequest, Transcoder};
use crate::config::TranscodeConfig;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Pixel format forced on every output so files stay playable everywhere
const PIX_FMT: &str = "yuv420p";

/// Codec-level settings that stay fixed for a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegSettings {
    /// ffmpeg binary
    pub program: PathBuf,
    /// `-vf` filter chain
    pub video_filter: String,
    /// `-c:v` codec
    pub video_codec: String,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            video_filter: "hqdn3d".to_string(),
            video_codec: "libx264".to_string(),
        }
    }
}

impl From<&TranscodeConfig> for FfmpegSettings {
    fn from(cfg: &TranscodeConfig) -> Self {
        Self {
            program: PathBuf::from(&cfg.ffmpeg),
            video_filter: cfg.video_filter.clone(),
            video_codec: cfg.video_codec.clone(),
        }
    }
}

/// Build the ffmpeg argument vector for a request.
///
/// Layout: `-y|-n -hide_banner [-f concat -safe 0] -i <input> -vf <filter> -c:v <codec>
/// -crf <crf> -preset <preset> -pix_fmt yuv420p <output>`
pub fn build_ffmpeg_args(settings: &FfmpegSettings, request: &TranscodeRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(20);

    args.push(OsString::from(if request.overwrite { "-y" } else { "-n" }));
    args.push("-hide_banner".into());

    match &request.input {
        TranscodeInput::File(path) => {
            args.push("-i".into());
            args.push(path.into());
        }
        TranscodeInput::ConcatList(list) => {
            args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
            args.push(list.into());
        }
    }

    args.push("-vf".into());
    args.push(settings.video_filter.as_str().into());
    args.push("-c:v".into());
    args.push(settings.video_codec.as_str().into());
    args.push("-crf".into());
    args.push(request.crf.to_string().into());
    args.push("-preset".into());
    args.push(request.preset.as_str().into());
    args.push("-pix_fmt".into());
    args.push(PIX_FMT.into());
    args.push(request.output.as_os_str().to_owned());

    args
}

/// Build the ffmpeg command for a request.
///
/// The child is killed if the returned future is dropped, which is how cancellation and
/// timeouts stop a running transcode.
pub fn build_ffmpeg_command(settings: &FfmpegSettings, request: &TranscodeRequest) -> Command {
    let mut cmd = Command::new(&settings.program);
    cmd.args(build_ffmpeg_args(settings, request))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Transcoder backed by an ffmpeg binary
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    settings: FfmpegSettings,
}

impl FfmpegTranscoder {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutcome, EncodeError> {
        let mut cmd = build_ffmpeg_command(&self.settings, request);
        log::debug!("Executing {:?}", cmd.as_std());

        let output = cmd.output().await.map_err(|source| EncodeError::Spawn {
            program: self.settings.program.clone(),
            source,
        })?;

        // ffmpeg writes its diagnostics to stderr; keep stdout too in case a filter prints
        let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.stdout.is_empty() {
            diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
        }

        Ok(TranscodeOutcome {
            exit_code: output.status.code(),
            diagnostics,
        })
    }
}
