//! Run manifest, error report and summary.

use crate::job::{JobResult, JobStatus};
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error writing a run report
#[derive(Debug, Error)]
#[error("Failed to write {}: {source}", .path.display())]
pub struct ReportError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Timestamp used in report file names, e.g. `20240101-120000`
pub fn run_stamp<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format("%Y%m%d-%H%M%S").to_string()
}

pub fn manifest_path(dir: &Path, stamp: &str) -> PathBuf {
    dir.join(format!("compactor_{}.log", stamp))
}

pub fn error_report_path(dir: &Path, stamp: &str) -> PathBuf {
    dir.join(format!("errors_{}.log", stamp))
}

fn inpath(result: &JobResult) -> String {
    let files: Vec<String> = result
        .batch
        .files
        .iter()
        .map(|f| f.path.display().to_string())
        .collect();
    format!("[{}]", files.join(", "))
}

/// One manifest line for a result
pub fn manifest_line(result: &JobResult) -> String {
    let output = result
        .output
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    match result.status {
        JobStatus::Succeeded => format!("Inpath: {}, Outpath: {}", inpath(result), output),
        JobStatus::Skipped(_) => format!(
            "Inpath: {}, Skipped: {} ({})",
            inpath(result),
            output,
            result.status
        ),
        JobStatus::Failed(code) => format!(
            "Inpath: {}, !ERROR {} ({})",
            inpath(result),
            code.code(),
            result.status
        ),
    }
}

/// One error report line for a failed result
pub fn error_line(result: &JobResult) -> Option<String> {
    if !result.is_failure() {
        return None;
    }
    let code = result.status.code()?;
    Some(format!(
        "Inpath: {}, RC: {}, {}",
        inpath(result),
        code,
        result.status
    ))
}

fn write_lines<I>(path: &Path, lines: I) -> Result<(), ReportError>
where
    I: IntoIterator<Item = String>,
{
    let wrap = |source| ReportError {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(wrap)?);
    for line in lines {
        writeln!(writer, "{}", line).map_err(wrap)?;
    }
    writer.flush().map_err(wrap)
}

/// Write `compactor_<stamp>.log` into `dir` with one line per result.
pub fn write_manifest(
    dir: &Path,
    stamp: &str,
    results: &[JobResult],
) -> Result<PathBuf, ReportError> {
    let path = manifest_path(dir, stamp);
    write_lines(&path, results.iter().map(manifest_line))?;
    log::info!("Wrote manifest {}", path.display());
    Ok(path)
}

/// Write `errors_<stamp>.log` into `dir` when at least one batch failed.
///
/// Returns `None` and writes nothing when there were no failures.
pub fn write_error_report(
    dir: &Path,
    stamp: &str,
    results: &[JobResult],
) -> Result<Option<PathBuf>, ReportError> {
    let lines: Vec<String> = results.iter().filter_map(error_line).collect();
    if lines.is_empty() {
        return Ok(None);
    }
    let path = error_report_path(dir, stamp);
    write_lines(&path, lines)?;
    log::warn!("Wrote error report {}", path.display());
    Ok(Some(path))
}

/// Counts over the results of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Input bytes of succeeded batches
    pub input_bytes: u64,
    /// Output bytes of succeeded batches
    pub output_bytes: u64,
}

impl RunSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                JobStatus::Succeeded => {
                    summary.succeeded += 1;
                    summary.input_bytes += result.batch.total_bytes();
                    summary.output_bytes += result.output_bytes.unwrap_or(0);
                }
                JobStatus::Skipped(_) => summary.skipped += 1,
                JobStatus::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    /// Process exit status: the failure count, saturated to fit a byte
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.failed).unwrap_or(u8::MAX)
    }

    pub fn log(&self) {
        log::info!(
            "{} batches: {} transcoded, {} skipped, {} failed",
            self.total(),
            self.succeeded,
            self.skipped,
            self.failed
        );
        if self.output_bytes > 0 {
            log::info!(
                "Transcoded {:.2} MB into {:.2} MB ({:.2}x)",
                self.input_bytes as f64 / 1e6,
                self.output_bytes as f64 / 1e6,
                self.input_bytes as f64 / self.output_bytes as f64
            );
        }
    }
}
