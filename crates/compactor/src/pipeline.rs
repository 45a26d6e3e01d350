//! End-to-end run: discover, plan, schedule, report, archive.

use crate::archive::{archive_originals, ArchiveReport};
use crate::concurrency::resolve_max_concurrency;
use crate::config::Config;
use crate::discovery::{discover, DiscoveryError, Selection};
use crate::encode::{FfmpegSettings, FfmpegTranscoder, Transcoder};
use crate::job::{format_duration, JobResult, JobSettings, NamingStyle};
use crate::planner::{plan, PlanMode};
use crate::results::{run_stamp, write_error_report, write_manifest, ReportError, RunSummary};
use crate::scheduler::{JobScheduler, SchedulerError};
use crate::startup::{check_transcoder_available, StartupError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::watch;

/// Error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything a completed run produced
#[derive(Debug)]
pub struct RunReport {
    /// One result per batch, in completion order
    pub results: Vec<JobResult>,
    pub summary: RunSummary,
    pub manifest: PathBuf,
    /// Present only when a batch failed
    pub error_report: Option<PathBuf>,
    /// Present when archiving was enabled
    pub archive: Option<ArchiveReport>,
    /// Wall clock at the start of the run; report names carry this stamp
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// No file matched the selection
    NothingToDo,
    /// Plan-only run: files and batches were counted, nothing transcoded
    Planned { files: usize, batches: usize },
    Completed(RunReport),
}

impl RunOutcome {
    /// Process exit status for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::NothingToDo | RunOutcome::Planned { .. } => 0,
            RunOutcome::Completed(report) => report.summary.exit_code(),
        }
    }
}

/// One transcode run over a target directory
pub struct Pipeline {
    target: PathBuf,
    config: Config,
    transcoder: Arc<dyn Transcoder>,
    plan_only: bool,
    skip_checks: bool,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    /// Pipeline running the ffmpeg binary named in `config`
    pub fn new(target: impl Into<PathBuf>, config: Config) -> Self {
        let transcoder = FfmpegTranscoder::new(FfmpegSettings::from(&config.transcode));
        Self {
            target: target.into(),
            config,
            transcoder: Arc::new(transcoder),
            plan_only: false,
            skip_checks: false,
            shutdown: None,
        }
    }

    /// Replace the transcoder; the ffmpeg startup check no longer applies
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self.skip_checks = true;
        self
    }

    pub fn plan_only(mut self, plan_only: bool) -> Self {
        self.plan_only = plan_only;
        self
    }

    pub fn skip_checks(mut self, skip_checks: bool) -> Self {
        self.skip_checks = skip_checks;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn selection(&self) -> (Selection, PlanMode) {
        match &self.config.selection.mask {
            Some(mask) => (
                Selection::Masked(mask.clone()),
                PlanMode::Masked(mask.clone()),
            ),
            None => (
                Selection::Glob(self.config.selection.glob.clone()),
                PlanMode::Simple,
            ),
        }
    }

    fn job_settings(&self, root: &Path, scratch_dir: &Path) -> JobSettings {
        let cfg = &self.config;
        JobSettings {
            output_dir: root.join(&cfg.output.output_dir_name),
            scratch_dir: scratch_dir.to_path_buf(),
            crf: cfg.transcode.crf,
            preset: cfg.transcode.preset.clone(),
            video_codec: cfg.transcode.video_codec.clone(),
            video_filter: cfg.transcode.video_filter.clone(),
            overwrite: cfg.output.overwrite,
            naming: if cfg.output.quality_naming {
                NamingStyle::Annotated
            } else {
                NamingStyle::Short
            },
            timeout: (cfg.transcode.timeout_secs > 0)
                .then(|| Duration::from_secs(cfg.transcode.timeout_secs)),
        }
    }

    /// Run the whole pipeline.
    ///
    /// Failures of individual batches are part of the returned report; only problems that
    /// prevent the run from starting or from writing its manifest are errors.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        let started = Instant::now();
        let started_at = Local::now();
        let stamp = run_stamp(&started_at);
        let root = self.target.canonicalize().map_err(|source| PipelineError::Io {
            path: self.target.clone(),
            source,
        })?;

        let (selection, mode) = self.selection();
        let files = match discover(&root, &selection, self.config.selection.exclude.as_deref()) {
            Ok(files) => files,
            Err(DiscoveryError::NoMatch { root, pattern }) => {
                log::warn!(
                    "No files matching '{}' found in {}, nothing to do",
                    pattern,
                    root.display()
                );
                return Ok(RunOutcome::NothingToDo);
            }
            Err(e) => return Err(e.into()),
        };

        let plan = plan(files, &mode);
        if self.plan_only {
            for batch in plan.iter() {
                log::info!("{} ({} file(s))", batch.key, batch.files.len());
            }
            return Ok(RunOutcome::Planned {
                files: plan.file_count(),
                batches: plan.len(),
            });
        }

        if !self.skip_checks {
            check_transcoder_available(Path::new(&self.config.transcode.ffmpeg)).await?;
        }

        let scratch = tempfile::Builder::new()
            .prefix("compactor-")
            .tempdir()
            .map_err(|source| PipelineError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let settings = self.job_settings(&root, scratch.path());
        fs::create_dir_all(&settings.output_dir).map_err(|source| PipelineError::Io {
            path: settings.output_dir.clone(),
            source,
        })?;

        let max_concurrency = resolve_max_concurrency(&self.config);
        log::info!(
            "Transcoding {} batches with crf {} preset {}, {} at a time, into {}",
            plan.len(),
            settings.crf,
            settings.preset,
            max_concurrency,
            settings.output_dir.display()
        );

        let output_dir = settings.output_dir.clone();
        let mut scheduler = JobScheduler::new(self.transcoder.clone(), settings, max_concurrency)?;
        if let Some(shutdown) = &self.shutdown {
            scheduler = scheduler.with_shutdown(shutdown.clone());
        }
        let results = scheduler.run(plan.into_batches()).await;
        drop(scratch);

        let manifest = write_manifest(&root, &stamp, &results)?;
        let error_report = write_error_report(&output_dir, &stamp, &results)?;

        let archive = self.config.output.archive_originals.then(|| {
            archive_originals(&results, &root.join(&self.config.output.archive_dir_name))
        });

        let summary = RunSummary::from_results(&results);
        summary.log();
        let elapsed = started.elapsed();
        log::info!("Run finished in {}", format_duration(elapsed));

        Ok(RunOutcome::Completed(RunReport {
            results,
            summary,
            manifest,
            error_report,
            archive,
            started_at,
            elapsed,
        }))
    }
}
