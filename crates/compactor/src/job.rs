//! Per-batch job execution and outcome classification.
//!
//! Every failure of a single job is caught here and turned into a [`JobResult`]; nothing a
//! job does can abort the scheduler loop.

use crate::config::MASK_PLACEHOLDER;
use crate::encode::{write_concat_list, TranscodeInput, TranscodeRequest, Transcoder};
use crate::planner::{Batch, BatchKey};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Code shown in the manifest for a batch skipped because its output exists
pub const OUTPUT_EXISTS_CODE: i32 = -1;

/// Why a batch was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Output exists and overwriting is disabled
    AlreadyExists,
}

/// Why a batch failed.
///
/// Transcoder exit codes are passed through untouched. Conditions detected by compactor
/// itself carry fixed negative codes so the two code spaces never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// Transcoder exited with this non-zero code
    Transcoder(i32),
    /// Transcoder exited 0 but the output is missing or empty
    MissingOutput,
    /// Concat list could not be written or the process could not be started
    LaunchFailed,
    /// Process was terminated by a signal
    Signaled,
    /// Run was shut down before the batch finished
    Cancelled,
    /// Per-job timeout elapsed and the process was killed
    TimedOut,
    /// An earlier batch of the run already claimed the same output path
    OutputCollision,
}

impl FailureCode {
    /// Numeric code for reports
    pub fn code(&self) -> i32 {
        match self {
            FailureCode::Transcoder(code) => *code,
            FailureCode::MissingOutput => -2,
            FailureCode::LaunchFailed => -3,
            FailureCode::Signaled => -4,
            FailureCode::Cancelled => -5,
            FailureCode::TimedOut => -6,
            FailureCode::OutputCollision => -7,
        }
    }
}

/// Terminal state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Skipped(SkipReason),
    Failed(FailureCode),
}

impl JobStatus {
    /// Human-readable classification
    pub fn describe(&self) -> String {
        match self {
            JobStatus::Succeeded => "transcoded".to_string(),
            JobStatus::Skipped(SkipReason::AlreadyExists) => {
                "output already existed, not overwriting".to_string()
            }
            JobStatus::Failed(FailureCode::Transcoder(code)) => {
                format!("transcoder exited with code {}", code)
            }
            JobStatus::Failed(FailureCode::MissingOutput) => {
                "transcoder reported success but produced no output".to_string()
            }
            JobStatus::Failed(FailureCode::LaunchFailed) => {
                "transcoder could not be started".to_string()
            }
            JobStatus::Failed(FailureCode::Signaled) => {
                "transcoder was terminated by a signal".to_string()
            }
            JobStatus::Failed(FailureCode::Cancelled) => "cancelled before completion".to_string(),
            JobStatus::Failed(FailureCode::TimedOut) => {
                "transcoder timed out and was killed".to_string()
            }
            JobStatus::Failed(FailureCode::OutputCollision) => {
                "another batch resolves to the same output, not transcoded".to_string()
            }
        }
    }

    /// Code for reports; `None` for successes
    pub fn code(&self) -> Option<i32> {
        match self {
            JobStatus::Succeeded => None,
            JobStatus::Skipped(SkipReason::AlreadyExists) => Some(OUTPUT_EXISTS_CODE),
            JobStatus::Failed(code) => Some(code.code()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub status: JobStatus,
    pub batch: Batch,
    /// Output path for succeeded and skipped batches
    pub output: Option<PathBuf>,
    /// Wall time spent on the batch
    pub elapsed: Duration,
    /// Output size after a successful transcode
    pub output_bytes: Option<u64>,
}

impl JobResult {
    pub fn failed(batch: Batch, code: FailureCode, elapsed: Duration) -> Self {
        Self {
            status: JobStatus::Failed(code),
            batch,
            output: None,
            elapsed,
            output_bytes: None,
        }
    }

    pub fn skipped(batch: Batch, output: PathBuf) -> Self {
        Self {
            status: JobStatus::Skipped(SkipReason::AlreadyExists),
            batch,
            output: Some(output),
            elapsed: Duration::ZERO,
            output_bytes: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }
}

/// Output file naming style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingStyle {
    /// `<stem>.mp4`
    #[default]
    Short,
    /// `<stem>_<codec>_crf<crf>_<preset>_<filter>.avi`, e.g.
    /// `movie_x264_crf18_veryfast_hqdn3d.avi`
    Annotated,
}

/// Parameters shared by every job of a run
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    /// Directory receiving the transcoded files
    pub output_dir: PathBuf,
    /// Run-scoped directory for concat lists
    pub scratch_dir: PathBuf,
    pub crf: u32,
    pub preset: String,
    /// `-c:v` codec, named in annotated output names
    pub video_codec: String,
    /// `-vf` filter chain, named in annotated output names
    pub video_filter: String,
    pub overwrite: bool,
    pub naming: NamingStyle,
    /// Kill a transcode that runs longer than this
    pub timeout: Option<Duration>,
}

/// Base name of the output: key stem without placeholders and trailing separators.
fn output_stem(key: &BatchKey) -> String {
    let stem: String = key.stem().chars().filter(|&c| c != MASK_PLACEHOLDER).collect();
    let trimmed = stem.trim_end_matches(['-', '_', '.', ' ']);
    if trimmed.is_empty() {
        "batch".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Codec as it appears in annotated names: `libx265` becomes `x265`
fn codec_tag(codec: &str) -> String {
    let tag = codec.strip_prefix("lib").unwrap_or(codec);
    if tag.is_empty() {
        "copy".to_string()
    } else {
        tag.to_string()
    }
}

/// Filter chain as it appears in annotated names: the filter names joined by `-`,
/// without their options. `hqdn3d=4:3,scale=1280:-1` becomes `hqdn3d-scale`.
fn filter_tag(chain: &str) -> String {
    let names: Vec<&str> = chain
        .split(',')
        .filter_map(|filter| filter.split('=').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        "nofilter".to_string()
    } else {
        names.join("-")
    }
}

/// Output file name for a batch
pub fn output_name(key: &BatchKey, settings: &JobSettings) -> String {
    let stem = output_stem(key);
    match settings.naming {
        NamingStyle::Short => format!("{}.mp4", stem),
        NamingStyle::Annotated => format!(
            "{}_{}_crf{}_{}_{}.avi",
            stem,
            codec_tag(&settings.video_codec),
            settings.crf,
            settings.preset,
            filter_tag(&settings.video_filter)
        ),
    }
}

/// Resolved output path for a batch
pub fn output_path(key: &BatchKey, settings: &JobSettings) -> PathBuf {
    settings.output_dir.join(output_name(key, settings))
}

/// Diagnostic log written next to an output: `<output>.ffmpeg.log`
pub fn diagnostics_log_path(output: &Path) -> PathBuf {
    let mut log_path = output.as_os_str().to_owned();
    log_path.push(".ffmpeg.log");
    PathBuf::from(log_path)
}

/// Concat list location for a batch inside the scratch directory
fn concat_list_path(scratch_dir: &Path, key: &BatchKey) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    scratch_dir.join(format!("{}-{:016x}.txt", output_stem(key), hasher.finish()))
}

/// Remove the truncated output of a killed transcode
pub(crate) fn discard_partial_output(output: &Path) {
    match std::fs::remove_file(output) {
        Ok(()) => log::debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial output {}: {}", output.display(), e),
    }
}

/// A batch ready to be handed to the transcoder
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub batch: Batch,
    pub output: PathBuf,
}

/// Result of preparing a batch
#[derive(Debug)]
pub enum Prepared {
    /// Needs a transcoder run
    Ready(Job),
    /// Already resolved without running anything
    Done(JobResult),
}

/// Resolve the output path and decide whether the batch needs to run at all.
///
/// An existing output with overwriting disabled resolves to `Skipped` right here, so the
/// batch never takes a concurrency slot.
pub fn prepare(batch: Batch, settings: &JobSettings) -> Prepared {
    let output = output_path(&batch.key, settings);
    if !settings.overwrite && output.exists() {
        log::info!(
            "Skipping {}: {} exists",
            batch.key,
            output.display()
        );
        return Prepared::Done(JobResult::skipped(batch, output));
    }
    Prepared::Ready(Job { batch, output })
}

/// Run one job to a terminal result.
pub async fn run_one_job<T>(transcoder: &T, job: Job, settings: &JobSettings) -> JobResult
where
    T: Transcoder + ?Sized,
{
    let started = Instant::now();
    let Job { batch, output } = job;
    let size_in = batch.total_bytes();

    log::info!(
        "Starting {} ({} file(s), {:.2} MB)",
        batch.key,
        batch.files.len(),
        size_in as f64 / 1e6
    );

    let input = if batch.is_fragmented() {
        let list = concat_list_path(&settings.scratch_dir, &batch.key);
        if let Err(e) = write_concat_list(&list, &batch.paths()) {
            log::error!("Failed to write concat list {}: {}", list.display(), e);
            write_diagnostics(&output, &format!("failed to write concat list: {}\n", e)).await;
            return JobResult::failed(batch, FailureCode::LaunchFailed, started.elapsed());
        }
        TranscodeInput::ConcatList(list)
    } else {
        TranscodeInput::File(batch.files[0].path.clone())
    };

    let request = TranscodeRequest {
        input,
        output: output.clone(),
        crf: settings.crf,
        preset: settings.preset.clone(),
        overwrite: settings.overwrite,
    };

    let attempt = match settings.timeout {
        Some(limit) => match tokio::time::timeout(limit, transcoder.transcode(&request)).await {
            Ok(attempt) => attempt,
            Err(_) => {
                log::error!("{} timed out after {}", batch.key, format_duration(limit));
                write_diagnostics(
                    &output,
                    &format!("killed after timeout of {}\n", format_duration(limit)),
                )
                .await;
                discard_partial_output(&output);
                return JobResult::failed(batch, FailureCode::TimedOut, started.elapsed());
            }
        },
        None => transcoder.transcode(&request).await,
    };

    let outcome = match attempt {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("{}: {}", batch.key, e);
            write_diagnostics(&output, &format!("{}\n", e)).await;
            return JobResult::failed(batch, FailureCode::LaunchFailed, started.elapsed());
        }
    };

    write_diagnostics(&output, &outcome.diagnostics).await;
    let elapsed = started.elapsed();

    if !outcome.success() {
        let code = match outcome.exit_code {
            Some(code) => FailureCode::Transcoder(code),
            None => FailureCode::Signaled,
        };
        let result = JobResult::failed(batch, code, elapsed);
        log::error!("{}: {}", result.batch.key, result.status);
        return result;
    }

    let size_out = match tokio::fs::metadata(&output).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        _ => {
            let result = JobResult::failed(batch, FailureCode::MissingOutput, elapsed);
            log::error!("{}: {}", result.batch.key, result.status);
            return result;
        }
    };

    log::info!(
        "{}: {}, {:.2} MB, compression: {:.2}x",
        output.display(),
        format_duration(elapsed),
        size_out as f64 / 1e6,
        size_in as f64 / size_out as f64
    );

    JobResult {
        status: JobStatus::Succeeded,
        batch,
        output: Some(output),
        elapsed,
        output_bytes: Some(size_out),
    }
}

/// Persist transcoder diagnostics; a failed write never changes the job outcome.
async fn write_diagnostics(output: &Path, text: &str) {
    let log_path = diagnostics_log_path(output);
    if let Err(e) = tokio::fs::write(&log_path, text).await {
        log::warn!("Failed to write {}: {}", log_path.display(), e);
    }
}

/// Format a duration as `1h 02min 03.000s`, leaving out leading zero units.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let frac = d.subsec_nanos() as f64 / 1e9;
    let (h, rem) = (total / 3600, total % 3600);
    let (m, s) = (rem / 60, rem % 60);
    let secs = s as f64 + frac;

    if h > 0 {
        format!("{}h {:02}min {:06.3}s", h, m, secs)
    } else if m > 0 {
        format!("{}min {:06.3}s", m, secs)
    } else {
        format!("{:.3}s", secs)
    }
}
