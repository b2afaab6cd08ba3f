// In-process fakes for the engine's external seams

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::tools::ToolPaths;
use super::traits::{CommandRunner, ProcessOutput, WebSearch};

/// Scripted outcome of one fake process
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub stdout_lines: Vec<String>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Pause before each stdout line
    pub line_delay: Duration,
    /// Pause after the last line, before exiting
    pub hold: Duration,
}

impl Reply {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stdout_lines: lines.into_iter().map(Into::into).collect(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    pub fn with_exit(mut self, code: i32, stderr: &str) -> Self {
        self.exit_code = Some(code);
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

type Script = dyn Fn(&[String]) -> Reply + Send + Sync;

/// [`CommandRunner`] that answers from a closure over the argument list
pub struct ScriptedRunner {
    script: Box<Script>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Argument lists of every invocation, in call order
    pub fn calls(&self) -> Arc<Mutex<Vec<Vec<String>>>> {
        Arc::clone(&self.calls)
    }

    /// Highest number of simultaneous streaming invocations seen
    pub fn peak(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }

    async fn play(
        &self,
        args: &[String],
        mut on_line: Option<&mut (dyn for<'l> FnMut(&'l str) + Send)>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError> {
        self.calls.lock().unwrap().push(args.to_vec());
        let reply = (self.script)(args);

        let mut stdout = String::new();
        for line in &reply.stdout_lines {
            pause(reply.line_delay, cancel).await?;
            stdout.push_str(line);
            stdout.push('\n');
            if let Some(callback) = on_line.as_deref_mut() {
                callback(line);
            }
        }
        pause(reply.hold, cancel).await?;

        Ok(ProcessOutput {
            stdout,
            stderr: reply.stderr,
            exit_code: reply.exit_code,
        })
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), DownloadError> {
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        _program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError> {
        self.play(args, None, cancel).await
    }

    async fn run_streaming(
        &self,
        _program: &Path,
        args: &[String],
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, DownloadError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.play(args, Some(on_line), cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// [`WebSearch`] with a canned answer
pub struct StaticWeb {
    answer: Result<Vec<String>, DownloadError>,
}

impl StaticWeb {
    pub fn ids(ids: &[&str]) -> Self {
        Self {
            answer: Ok(ids.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: Err(DownloadError::Network("connection reset".to_string())),
        }
    }
}

#[async_trait]
impl WebSearch for StaticWeb {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn find_video_ids(&self, _query: &str) -> Result<Vec<String>, DownloadError> {
        self.answer.clone()
    }
}

/// Empty placeholder executables in a temp dir; keep the dir alive for the test
pub fn fake_tools() -> (TempDir, ToolPaths) {
    let dir = tempfile::tempdir().unwrap();
    let ytdlp = dir.path().join("yt-dlp");
    let ffmpeg = dir.path().join("ffmpeg");
    std::fs::write(&ytdlp, b"").unwrap();
    std::fs::write(&ffmpeg, b"").unwrap();
    let tools = ToolPaths::new(&ytdlp, &ffmpeg).unwrap();
    (dir, tools)
}

/// Flag present in an argument list
pub fn has_arg(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
