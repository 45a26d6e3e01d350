//! Compactor
//!
//! Batch video transcoder: finds the recordings in a directory, groups capture fragments
//! into batches, runs a bounded number of ffmpeg processes over them and reports the outcome
//! of every batch.

pub mod archive;
pub mod concurrency;
pub mod discovery;
pub mod encode;
pub mod job;
pub mod pattern;
pub mod pipeline;
pub mod planner;
pub mod results;
pub mod scheduler;
pub mod startup;

#[cfg(test)]
pub(crate) mod testing;

pub use compactor_config as config;
pub use compactor_config::Config;
pub use archive::{archive_originals, ArchiveError, ArchiveReport};
pub use concurrency::resolve_max_concurrency;
pub use discovery::{discover, DiscoveryError, Selection, SourceFile};
pub use encode::{
    build_ffmpeg_args, build_ffmpeg_command, EncodeError, FfmpegSettings, FfmpegTranscoder,
    TranscodeInput, TranscodeOutcome, TranscodeRequest, Transcoder,
};
pub use job::{
    format_duration, output_name, run_one_job, FailureCode, Job, JobResult, JobSettings,
    JobStatus, NamingStyle, SkipReason,
};
pub use pattern::{apply_mask, glob_match, mask_to_glob};
pub use pipeline::{Pipeline, PipelineError, RunOutcome, RunReport};
pub use planner::{plan, Batch, BatchKey, BatchPlan, PlanMode};
pub use results::{write_error_report, write_manifest, ReportError, RunSummary};
pub use scheduler::{JobScheduler, SchedulerError};
pub use startup::{check_transcoder_available, StartupError};
