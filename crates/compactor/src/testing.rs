//! Scripted transcoder for tests.

use crate::encode::{EncodeError, TranscodeInput, TranscodeOutcome, TranscodeRequest, Transcoder};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Behavior for inputs whose path contains a given fragment
#[derive(Debug, Clone)]
pub enum Script {
    /// Exit with this code without writing output
    Exit(i32),
    /// Exit 0 without writing output
    SucceedWithoutOutput,
    /// Terminated by a signal
    Signaled,
    /// The binary cannot be started
    SpawnError,
    /// Sleep, then succeed
    Sleep(Duration),
    /// Write a truncated output, then sleep, then succeed
    Hang(Duration),
}

/// Transcoder that writes a small output file unless scripted otherwise.
///
/// Tracks how many transcodes run at the same time so tests can check the concurrency
/// bound.
#[derive(Debug, Default)]
pub struct FakeTranscoder {
    scripts: Vec<(String, Script)>,
    delay: Duration,
    running: AtomicUsize,
    high_water: AtomicUsize,
    invocations: Mutex<Vec<TranscodeRequest>>,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `script` to inputs whose path contains `fragment`
    pub fn script(mut self, fragment: &str, script: Script) -> Self {
        self.scripts.push((fragment.to_string(), script));
        self
    }

    /// Delay every unscripted transcode
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of transcodes observed running at once
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<TranscodeRequest> {
        self.invocations.lock().unwrap().clone()
    }

    fn script_for(&self, input: &Path) -> Option<Script> {
        let input = input.to_string_lossy();
        self.scripts
            .iter()
            .find(|(fragment, _)| input.contains(fragment.as_str()))
            .map(|(_, script)| script.clone())
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutcome, EncodeError> {
        self.invocations.lock().unwrap().push(request.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let input = match &request.input {
            TranscodeInput::File(path) | TranscodeInput::ConcatList(path) => path,
        };

        let exit = |code| TranscodeOutcome {
            exit_code: code,
            diagnostics: format!("fake transcode of {}\n", input.display()),
        };

        match self.script_for(input) {
            Some(Script::Exit(code)) => return Ok(exit(Some(code))),
            Some(Script::SucceedWithoutOutput) => return Ok(exit(Some(0))),
            Some(Script::Signaled) => return Ok(exit(None)),
            Some(Script::SpawnError) => {
                return Err(EncodeError::Spawn {
                    program: "fake-ffmpeg".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "not found"),
                })
            }
            Some(Script::Sleep(duration)) => tokio::time::sleep(duration).await,
            Some(Script::Hang(duration)) => {
                tokio::fs::write(&request.output, b"trunc").await?;
                tokio::time::sleep(duration).await;
                return Ok(exit(Some(0)));
            }
            None => {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
            }
        }

        // Same refusal ffmpeg gives with `-n`
        if !request.overwrite && request.output.exists() {
            return Ok(exit(Some(1)));
        }
        tokio::fs::write(&request.output, b"transcoded").await?;
        Ok(exit(Some(0)))
    }
}
