//! Bounded-concurrency job scheduler
//!
//! Keeps up to `max_concurrency` transcodes in flight, waits for whichever finishes first and
//! refills the freed slot from the queue. Everything runs on the calling task; the external
//! transcoder processes provide the parallelism.

use crate::encode::Transcoder;
use crate::job::{
    discard_partial_output, output_path, prepare, run_one_job, FailureCode, JobResult,
    JobSettings, Prepared,
};
use crate::planner::Batch;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Errors constructing a scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Runs batches through a transcoder with a fixed concurrency limit
pub struct JobScheduler {
    transcoder: Arc<dyn Transcoder>,
    settings: JobSettings,
    max_concurrency: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl JobScheduler {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        settings: JobSettings,
        max_concurrency: usize,
    ) -> Result<Self, SchedulerError> {
        if max_concurrency == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }
        Ok(Self {
            transcoder,
            settings,
            max_concurrency,
            shutdown: None,
        })
    }

    /// Stop the run once `shutdown` turns `true`.
    ///
    /// Running transcodes are dropped, which kills their processes. Every batch that did not
    /// finish is reported as `Failed(Cancelled)`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run every batch to a terminal result.
    ///
    /// Returns exactly one result per batch, in completion order. Skips are resolved before a
    /// batch is started and never occupy a slot. When several batches resolve to the same
    /// output file only the first in queue order runs; the others fail with
    /// `OutputCollision`.
    pub async fn run(&self, batches: Vec<Batch>) -> Vec<JobResult> {
        let total = batches.len();
        let mut results = Vec::with_capacity(total);
        let mut queue = self.claim_outputs(batches, &mut results);
        let mut in_flight = FuturesUnordered::new();
        // Batches currently running, kept so a shutdown can still report them
        let mut running: BTreeMap<usize, (Batch, PathBuf, Instant)> = BTreeMap::new();

        let mut shutdown = self.shutdown.clone();
        let mut cancelled = shutdown.as_ref().is_some_and(|rx| *rx.borrow());

        loop {
            while !cancelled && in_flight.len() < self.max_concurrency {
                let Some((id, batch)) = queue.pop_front() else {
                    break;
                };
                match prepare(batch, &self.settings) {
                    Prepared::Done(result) => results.push(result),
                    Prepared::Ready(job) => {
                        running.insert(
                            id,
                            (job.batch.clone(), job.output.clone(), Instant::now()),
                        );
                        in_flight.push(
                            run_one_job(self.transcoder.as_ref(), job, &self.settings)
                                .map(move |result| (id, result)),
                        );
                    }
                }
            }

            if cancelled || (in_flight.is_empty() && queue.is_empty()) {
                break;
            }

            tokio::select! {
                biased;
                Some((id, result)) = in_flight.next() => {
                    running.remove(&id);
                    results.push(result);
                    log::info!("Finished {}/{} batches", results.len(), total);
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    log::warn!(
                        "Shutdown requested, cancelling {} running and {} queued batches",
                        running.len(),
                        queue.len()
                    );
                    cancelled = true;
                }
            }
        }

        // Kills whatever is still running
        drop(in_flight);

        for (_, (batch, output, started)) in running {
            discard_partial_output(&output);
            results.push(JobResult::failed(
                batch,
                FailureCode::Cancelled,
                started.elapsed(),
            ));
        }
        for (_, batch) in queue {
            results.push(JobResult::failed(batch, FailureCode::Cancelled, Duration::ZERO));
        }

        results
    }

    /// Queue the batches that own their output path; fail the rest as collisions
    fn claim_outputs(
        &self,
        batches: Vec<Batch>,
        results: &mut Vec<JobResult>,
    ) -> VecDeque<(usize, Batch)> {
        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut queue = VecDeque::with_capacity(batches.len());
        for (id, batch) in batches.into_iter().enumerate() {
            let output = output_path(&batch.key, &self.settings);
            if claimed.insert(output.clone()) {
                queue.push_back((id, batch));
            } else {
                log::error!(
                    "{} resolves to {}, which an earlier batch already writes",
                    batch.key,
                    output.display()
                );
                results.push(JobResult::failed(
                    batch,
                    FailureCode::OutputCollision,
                    Duration::ZERO,
                ));
            }
        }
        queue
    }
}

/// Resolve once the shutdown flag is `true`; never resolves without a receiver or after the
/// sender is gone.
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SourceFile;
    use crate::encode::TranscodeInput;
    use crate::job::{JobStatus, NamingStyle, SkipReason};
    use crate::planner::BatchKey;
    use crate::testing::{FakeTranscoder, Script};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn settings(dir: &Path, overwrite: bool) -> JobSettings {
        let output_dir = dir.join("transcoded");
        let scratch_dir = dir.join("scratch");
        fs::create_dir_all(&output_dir).unwrap();
        fs::create_dir_all(&scratch_dir).unwrap();
        JobSettings {
            output_dir,
            scratch_dir,
            crf: 18,
            preset: "veryfast".to_string(),
            video_codec: "libx264".to_string(),
            video_filter: "hqdn3d".to_string(),
            overwrite,
            naming: NamingStyle::Short,
            timeout: None,
        }
    }

    fn batches(dir: &Path, count: usize) -> Vec<Batch> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("clip{:02}.avi", i));
                fs::write(&path, b"source").unwrap();
                Batch::single(SourceFile {
                    path,
                    size_bytes: 6,
                })
            })
            .collect()
    }

    fn keys(results: &[JobResult]) -> BTreeSet<BatchKey> {
        results.iter().map(|r| r.batch.key.clone()).collect()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let temp = TempDir::new().unwrap();
        let result = JobScheduler::new(
            Arc::new(FakeTranscoder::new()),
            settings(temp.path(), false),
            0,
        );
        assert!(matches!(result, Err(SchedulerError::ZeroConcurrency)));
    }

    #[tokio::test]
    async fn test_every_batch_yields_one_result_within_bound() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new().with_delay(Duration::from_millis(20)));
        let scheduler =
            JobScheduler::new(fake.clone(), settings(temp.path(), false), 3).unwrap();
        let input = batches(temp.path(), 10);
        let expected: BTreeSet<BatchKey> = input.iter().map(|b| b.key.clone()).collect();

        let results = scheduler.run(input).await;

        assert_eq!(results.len(), 10);
        assert_eq!(keys(&results), expected);
        assert!(results.iter().all(|r| r.status == JobStatus::Succeeded));
        assert!(fake.high_water() <= 3);
        assert_eq!(fake.high_water(), 3);
    }

    #[tokio::test]
    async fn test_empty_input_returns_immediately() {
        let temp = TempDir::new().unwrap();
        let scheduler = JobScheduler::new(
            Arc::new(FakeTranscoder::new()),
            settings(temp.path(), false),
            2,
        )
        .unwrap();
        assert!(scheduler.run(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new().script("clip02", Script::Exit(1)));
        let scheduler =
            JobScheduler::new(fake.clone(), settings(temp.path(), false), 2).unwrap();

        let results = scheduler.run(batches(temp.path(), 5)).await;

        assert_eq!(results.len(), 5);
        let failed: Vec<&JobResult> = results.iter().filter(|r| r.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].batch.key.as_str().contains("clip02"));
        assert_eq!(
            failed[0].status,
            JobStatus::Failed(FailureCode::Transcoder(1))
        );
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 4);
    }

    #[tokio::test]
    async fn test_second_run_skips_without_invoking_transcoder() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new());
        let scheduler =
            JobScheduler::new(fake.clone(), settings(temp.path(), false), 2).unwrap();
        let input = batches(temp.path(), 4);

        let first = scheduler.run(input.clone()).await;
        assert!(first.iter().all(|r| r.is_success()));
        assert_eq!(fake.invocations().len(), 4);

        let second = scheduler.run(input).await;
        assert_eq!(second.len(), 4);
        assert!(second
            .iter()
            .all(|r| r.status == JobStatus::Skipped(SkipReason::AlreadyExists)));
        assert_eq!(fake.invocations().len(), 4);
    }

    #[tokio::test]
    async fn test_overwrite_reruns_existing_outputs() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new());
        let scheduler =
            JobScheduler::new(fake.clone(), settings(temp.path(), true), 2).unwrap();
        let input = batches(temp.path(), 3);

        scheduler.run(input.clone()).await;
        let second = scheduler.run(input).await;

        assert!(second.iter().all(|r| r.is_success()));
        assert_eq!(fake.invocations().len(), 6);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_and_queued() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new().with_delay(Duration::from_secs(30)));
        let (tx, rx) = watch::channel(false);
        let scheduler = JobScheduler::new(fake.clone(), settings(temp.path(), false), 2)
            .unwrap()
            .with_shutdown(rx);
        let input = batches(temp.path(), 5);
        let expected: BTreeSet<BatchKey> = input.iter().map(|b| b.key.clone()).collect();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let results = scheduler.run(input).await;

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(results.len(), 5);
        assert_eq!(keys(&results), expected);
        assert!(results
            .iter()
            .all(|r| r.status == JobStatus::Failed(FailureCode::Cancelled)));
        assert_eq!(fake.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_removes_partial_outputs() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(
            FakeTranscoder::new().script("clip", Script::Hang(Duration::from_secs(30))),
        );
        let (tx, rx) = watch::channel(false);
        let settings = settings(temp.path(), false);
        let output_dir = settings.output_dir.clone();
        let scheduler = JobScheduler::new(fake.clone(), settings, 2)
            .unwrap()
            .with_shutdown(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let results = scheduler.run(batches(temp.path(), 3)).await;

        assert_eq!(results.len(), 3);
        assert_eq!(fake.invocations().len(), 2);
        for request in fake.invocations() {
            assert!(!request.output.exists());
        }
        assert_eq!(fs::read_dir(&output_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_shared_output_runs_only_first_batch() {
        let temp = TempDir::new().unwrap();
        let mut input = batches(temp.path(), 2);
        for ext in ["mkv", "mp4"] {
            let path = temp.path().join(format!("clip00.{}", ext));
            fs::write(&path, b"source").unwrap();
            input.push(Batch::single(SourceFile {
                path,
                size_bytes: 6,
            }));
        }
        let fake = Arc::new(FakeTranscoder::new());
        let scheduler =
            JobScheduler::new(fake.clone(), settings(temp.path(), true), 3).unwrap();

        let results = scheduler.run(input).await;

        assert_eq!(results.len(), 4);
        let collided: Vec<&JobResult> = results
            .iter()
            .filter(|r| r.status == JobStatus::Failed(FailureCode::OutputCollision))
            .collect();
        assert_eq!(collided.len(), 2);
        assert!(collided
            .iter()
            .all(|r| !r.batch.key.as_str().ends_with(".avi")));
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
        assert_eq!(fake.invocations().len(), 2);
        let clip00 = temp.path().join("clip00.avi");
        assert!(fake
            .invocations()
            .iter()
            .any(|r| r.input == TranscodeInput::File(clip00.clone())));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_nothing() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new());
        let (_tx, rx) = watch::channel(true);
        let scheduler = JobScheduler::new(fake.clone(), settings(temp.path(), false), 2)
            .unwrap()
            .with_shutdown(rx);

        let results = scheduler.run(batches(temp.path(), 3)).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_failure()));
        assert!(fake.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_does_not_cancel() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTranscoder::new().with_delay(Duration::from_millis(10)));
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let scheduler = JobScheduler::new(fake, settings(temp.path(), false), 2)
            .unwrap()
            .with_shutdown(rx);

        let results = scheduler.run(batches(temp.path(), 4)).await;
        assert!(results.iter().all(|r| r.is_success()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn test_any_batch_count_completes_within_bound(count in 0usize..12, max in 1usize..5) {
            let temp = TempDir::new().unwrap();
            let fake = Arc::new(FakeTranscoder::new().with_delay(Duration::from_millis(5)));
            let scheduler =
                JobScheduler::new(fake.clone(), settings(temp.path(), false), max).unwrap();
            let input = batches(temp.path(), count);
            let expected: BTreeSet<BatchKey> = input.iter().map(|b| b.key.clone()).collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let results = runtime.block_on(scheduler.run(input));

            prop_assert_eq!(results.len(), count);
            prop_assert_eq!(keys(&results), expected);
            prop_assert!(results.iter().all(|r| r.is_success()));
            prop_assert!(fake.high_water() <= max);
            prop_assert_eq!(fake.high_water(), count.min(max));
        }
    }
}
