//! CLI entry point for compactor
//!
//! Builds the run configuration from defaults, an optional config file, the environment and
//! the command line, then runs the pipeline. The exit status is the number of failed batches.

use anyhow::{Context, Result};
use clap::Parser;
use compactor::{Config, Pipeline, RunOutcome};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;

/// Exit status for errors that stop the run before any batch is scheduled
const EXIT_SETUP_FAILED: u8 = 255;

/// Transcode the video files of a directory, joining capture fragments into one output each
#[derive(Parser, Debug)]
#[command(name = "compactor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the files to transcode
    #[arg(default_value = ".")]
    target: PathBuf,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// x264 preset
    #[arg(long)]
    preset: Option<String>,

    /// Constant rate factor (lower is better quality)
    #[arg(short = 'c', long)]
    crf: Option<u32>,

    /// Maximum number of concurrent ffmpeg processes (0 = derive from CPU count)
    #[arg(short = 'P', long = "max-procs")]
    max_procs: Option<u32>,

    /// Move originals of successful batches into the archive directory
    #[arg(short = 'O', long)]
    move_originals: bool,

    /// Overwrite existing outputs
    #[arg(long)]
    overwrite: bool,

    /// Glob selecting the input files
    #[arg(short = 'g', long)]
    glob: Option<String>,

    /// Masked pattern; `#` marks fragment index positions and enables grouping
    #[arg(short = 'm', long)]
    mask: Option<String>,

    /// Ignore files whose name matches this glob
    #[arg(short = 'x', long)]
    exclude: Option<String>,

    /// Put crf and preset into output file names
    #[arg(short = 'Q', long)]
    quality_naming: bool,

    /// Kill a transcode after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Only count files and batches
    #[arg(long)]
    plan_only: bool,

    /// Skip the ffmpeg availability check
    #[arg(long)]
    skip_checks: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Apply command line flags on top of `cfg`
    fn apply(&self, cfg: &mut Config) {
        if let Some(preset) = &self.preset {
            cfg.transcode.preset = preset.clone();
        }
        if let Some(crf) = self.crf {
            cfg.transcode.crf = crf;
        }
        if let Some(max_procs) = self.max_procs {
            cfg.scheduler.max_concurrency = max_procs;
        }
        if let Some(timeout) = self.timeout {
            cfg.transcode.timeout_secs = timeout;
        }
        if let Some(glob) = &self.glob {
            cfg.selection.glob = glob.clone();
        }
        if let Some(mask) = &self.mask {
            cfg.selection.mask = Some(mask.clone());
        }
        if let Some(exclude) = &self.exclude {
            cfg.selection.exclude = Some(exclude.clone());
        }
        if self.move_originals {
            cfg.output.archive_originals = true;
        }
        if self.overwrite {
            cfg.output.overwrite = true;
        }
        if self.quality_naming {
            cfg.output.quality_naming = true;
        }
    }

    fn load_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::from_env(),
        };
        self.apply(&mut cfg);
        Ok(cfg)
    }
}

async fn run(args: Args) -> Result<u8> {
    let cfg = args.load_config()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running transcodes");
            let _ = shutdown_tx.send(true);
        }
    });

    let pipeline = Pipeline::new(&args.target, cfg)
        .plan_only(args.plan_only)
        .skip_checks(args.skip_checks)
        .with_shutdown(shutdown_rx);

    let outcome = pipeline
        .run()
        .await
        .with_context(|| format!("Run over {} failed", args.target.display()))?;

    match &outcome {
        RunOutcome::NothingToDo => info!("Nothing to do"),
        RunOutcome::Planned { files, batches } => {
            info!("Found {} matching files in {} batches.", files, batches)
        }
        RunOutcome::Completed(report) => {
            if let Some(errors) = &report.error_report {
                warn!(
                    "{} batch(es) failed, see {}",
                    report.summary.failed,
                    errors.display()
                );
            }
            if let Some(archive) = &report.archive {
                if !archive.is_clean() {
                    warn!("{} original(s) could not be archived", archive.failures.len());
                }
            }
        }
    }

    Ok(outcome.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}
